//! 📦 Common sink config: the shared DNA of every sink backend.
//!
//! 🧠 Knowledge graph:
//! - `CommonSinkConfig` is flattened into every sink config (`ElasticsearchSinkConfig`,
//!   the in-memory sink). The sink worker reads it to decide when to flush.
//! - `BulkWriteAction` picks the bulk verb. `create` is the default because a
//!   re-ingested line item must never become two documents.
//!
//! ⚠️ Lives in `backends` (not `app_config`) to avoid a circular import:
//!   `app_config` → `backends/es` → `app_config`. The module system has opinions. 🦆

use serde::Deserialize;

/// ✍️ Which bulk action each document is written with.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BulkWriteAction {
    /// 🆕 Write only if the id is new. Existing ids come back as a harmless 409.
    #[default]
    Create,
    /// 🔁 Write and overwrite whatever was there.
    Index,
}

impl BulkWriteAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Index => "index",
        }
    }
}

/// 🚰 Shared configuration embedded by every sink backend config.
///
/// `max_request_size_bytes` is the flush trigger: the sink worker accumulates
/// rendered documents until the buffer reaches it, then sends. There is no
/// limit on pending document count, only on bytes.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct CommonSinkConfig {
    /// 🚰 Max payload bytes per bulk request
    #[serde(default = "default_max_request_size_bytes")]
    pub max_request_size_bytes: usize,
    /// ✍️ Bulk verb, `create` unless told otherwise
    #[serde(default)]
    pub write_action: BulkWriteAction,
}

// 🚰 5MB: the size Elasticsearch's own docs keep nudging you towards. We nudged back, gently.
fn default_max_request_size_bytes() -> usize {
    5 * 1024 * 1024
}

impl Default for CommonSinkConfig {
    fn default() -> Self {
        Self {
            max_request_size_bytes: default_max_request_size_bytes(),
            write_action: BulkWriteAction::default(),
        }
    }
}
