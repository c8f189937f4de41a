use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::backends::{BulkOutcome, CommonSinkConfig, Sink};

/// 🔧 The in-memory sink only has the knobs every sink has.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct InMemorySinkConfig {
    #[serde(flatten)]
    pub common_config: CommonSinkConfig,
}

/// 📦 A sink that never forgets, and never duplicates.
///
/// `InMemorySink` parses the NDJSON bulk body it receives (action line, then
/// source line) and stores each document under `(index, id)`. `create` on an
/// existing id is counted as already-present, `index` overwrites. That is the
/// whole of Elasticsearch we need for the pipeline's idempotence to be testable.
///
/// 🔒 `Arc<Mutex<...>>` because every sink worker holds a clone and tests peek
/// inside after the run. Everyone shares the same map. Communist data, but in a
/// good way.
#[derive(Debug, Default, Clone)]
pub(crate) struct InMemorySink {
    pub(crate) documents: Arc<Mutex<HashMap<(String, String), serde_json::Value>>>,
    pub(crate) payloads_received: Arc<AtomicUsize>,
    // 💀 how many upcoming sends should blow up. Test-only chaos, counted down.
    failures_remaining: Arc<AtomicUsize>,
}

impl InMemorySink {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// 💀 Make the next `count` sends fail at the transport level.
    #[cfg(test)]
    pub(crate) fn failing_next(self, count: usize) -> Self {
        self.failures_remaining.store(count, Ordering::SeqCst);
        self
    }

    #[cfg(test)]
    pub(crate) async fn document_count(&self) -> usize {
        self.documents.lock().await.len()
    }
}

#[async_trait]
impl Sink for InMemorySink {
    async fn send(&mut self, payload: String, doc_count: usize) -> Result<BulkOutcome> {
        self.payloads_received.fetch_add(1, Ordering::SeqCst);
        let the_failure_was_scheduled = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if the_failure_was_scheduled {
            anyhow::bail!("💀 in-memory sink dropped a payload of {} documents on purpose", doc_count);
        }

        let mut the_outcome = BulkOutcome::default();
        let mut the_documents = self.documents.lock().await;
        let mut the_lines = payload.lines().filter(|line| !line.is_empty());
        while let Some(the_action_line) = the_lines.next() {
            let the_action: serde_json::Value = serde_json::from_str(the_action_line)
                .context("💀 in-memory sink got an action line that is not JSON")?;
            let the_source_line = the_lines
                .next()
                .context("💀 in-memory sink got an action line with no source line after it")?;
            let the_source: serde_json::Value = serde_json::from_str(the_source_line)
                .context("💀 in-memory sink got a source line that is not JSON")?;

            let (the_verb, the_meta) = the_action
                .as_object()
                .and_then(|object| object.iter().next())
                .context("💀 in-memory sink got an empty action object")?;
            let the_index = the_meta["_index"].as_str().unwrap_or_default().to_string();
            let the_id = the_meta["_id"].as_str().unwrap_or_default().to_string();
            let the_slot = (the_index, the_id);

            if the_verb == "create" && the_documents.contains_key(&the_slot) {
                the_outcome.already_present += 1;
            } else {
                the_documents.insert(the_slot, the_source);
                the_outcome.written += 1;
            }
        }
        Ok(the_outcome)
    }

    async fn close(&mut self) -> Result<()> {
        // 🗑️ Nothing to flush. We live in RAM.
        Ok(())
    }
}
