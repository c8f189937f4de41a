//! # Previously, on billx...
//!
//! 🎬 The bill was stuck in a bucket, and the test suite had no AWS account.
//! Someone had to pretend to be S3. Someone had to pretend to be Elasticsearch.
//! That someone lives entirely in RAM and forgets everything when the test ends.
//!
//! `in_mem` provides an in-memory [`ObjectStore`](super::ObjectStore) and an
//! in-memory [`Sink`](super::Sink) for tests, local development and dry runs.
//! The store pages its listings like S3 does. The sink honours create semantics
//! like Elasticsearch does, so "indexed exactly once" is an assertion, not a hope.
//!
//! ✅ No network calls. No disk I/O. Just vibes and heap memory. 🦆

#[cfg(test)]
mod in_mem_object_store;
mod in_mem_sink;

#[cfg(test)]
pub(crate) use in_mem_object_store::InMemoryObjectStore;
pub(crate) use in_mem_sink::InMemorySink;
pub use in_mem_sink::InMemorySinkConfig;
