//! # 📡 THE ELASTICSEARCH BACKEND
//!
//! 🎬 COLD OPEN, INT. SERVER ROOM, 3:47 AM
//!
//! The dashboard says the bill for March is missing. The bill for March is not
//! missing. The bill for March is sitting in a `_bulk` request that got a 429
//! and is now waiting for tomorrow's run to try again. Everyone is fine.
//!
//! 🚀 This module sends line items into the elastic void via the `_bulk` API,
//! one NDJSON payload at a time, and reads back which documents stuck.
//!
//! 🦆 (mandatory duck, no context provided, none shall be requested)

mod elasticsearch_sink;

pub(crate) use elasticsearch_sink::ElasticsearchSink;
pub use elasticsearch_sink::ElasticsearchSinkConfig;
