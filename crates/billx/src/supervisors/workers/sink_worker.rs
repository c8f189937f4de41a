//! 🎬 *[a channel fills with line items. somewhere, a sink waits.]*
//! *[the clock on the wall reads 2:47am.]*
//! *[nobody asked for this month's bill. and yet, here it is.]*
//!
//! 🗑️ The SinkWorker module: patient, tireless, and deeply unbothered by the chaos
//! happening upstream. It receives line items, lifts their tags, renders them,
//! and flushes whenever the buffer gets heavy. It asks no questions.
//!
//! 🧠 Knowledge graph:
//! - Pulls from the run-level fan-in output, shared with its sibling sink workers (MPMC)
//! - `extract_tags` → `ElasticsearchBulk` → buffer → `Sink::send` when the buffer
//!   reaches `max_request_size_bytes`
//! - Channel closed = no more line items: final flush, then `close()`
//! - A failed bulk request is logged and counted, never fatal. The checkpoint
//!   logic reads the count and holds the checkpoint back.
//!
//! 🦆 (the duck has no comment at this time)

use std::time::Instant;

use anyhow::{Context, Result};
use async_channel::Receiver;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{Worker, recv_or_cancelled};
use crate::backends::{CommonSinkConfig, Sink, SinkBackend};
use crate::common::LineItem;
use crate::supervisors::IngestOutcome;
use crate::transforms::{BulkTarget, EgressTransform, ElasticsearchBulk, extract_tags};

/// 🗑️ The SinkWorker: line items in, bulk payloads out.
#[derive(Debug)]
pub(crate) struct SinkWorker {
    rx: Receiver<LineItem>,
    sink: SinkBackend,
    target: BulkTarget,
    sink_config: CommonSinkConfig,
    token: CancellationToken,
    buffer: String,
    buffered_docs: usize,
    outcome: IngestOutcome,
}

impl SinkWorker {
    pub(crate) fn new(
        rx: Receiver<LineItem>,
        sink: SinkBackend,
        target: BulkTarget,
        sink_config: CommonSinkConfig,
        token: CancellationToken,
    ) -> Self {
        Self {
            rx,
            sink,
            target,
            sink_config,
            token,
            buffer: String::new(),
            buffered_docs: 0,
            outcome: IngestOutcome::default(),
        }
    }

    async fn drain(mut self) -> Result<IngestOutcome> {
        debug!("📥 SinkWorker started draining line items into {}", self.target.index);
        while let Some(mut the_item) = recv_or_cancelled(&self.rx, &self.token).await {
            extract_tags(&mut the_item);
            let the_rendered = ElasticsearchBulk::transform_line_item(&the_item, &self.target)?;
            self.buffer.push_str(&the_rendered);
            self.buffer.push('\n');
            self.buffered_docs += 1;

            if self.buffer.len() >= self.sink_config.max_request_size_bytes {
                self.flush().await;
            }
        }

        if self.token.is_cancelled() {
            debug!("🚪 SinkWorker cancelled, dropping {} buffered line items", self.buffered_docs);
        } else {
            self.flush().await;
        }
        debug!("🏁 SinkWorker: channel closed. Shutting down.");
        self.sink.close().await.context("💀 SinkWorker failed to close its sink")?;
        Ok(self.outcome)
    }

    /// 🚽 Send whatever is buffered. Failures are counted and logged, never returned.
    async fn flush(&mut self) {
        if self.buffered_docs == 0 {
            return;
        }
        let the_payload = std::mem::take(&mut self.buffer);
        let the_docs = std::mem::take(&mut self.buffered_docs);
        let the_bytes = the_payload.len();
        let the_started = Instant::now();

        let the_result = tokio::select! {
            biased;
            _ = self.token.cancelled() => return,
            sent = self.sink.send(the_payload, the_docs) => sent,
        };
        let the_elapsed_ms = the_started.elapsed().as_millis();

        match the_result {
            Ok(bulk) => {
                self.outcome.line_items_indexed += bulk.written;
                self.outcome.line_items_already_present += bulk.already_present;
                self.outcome.line_items_failed += bulk.failed;
                if bulk.failed == 0 {
                    info!(
                        "✅ bulk write: {} docs, {} bytes, {} ms ({} new, {} already present)",
                        the_docs, the_bytes, the_elapsed_ms, bulk.written, bulk.already_present
                    );
                } else {
                    error!(
                        "💀 bulk write: {} docs, {} bytes, {} ms, {} documents rejected",
                        the_docs, the_bytes, the_elapsed_ms, bulk.failed
                    );
                }
            }
            Err(send_error) => {
                self.outcome.payloads_failed += 1;
                self.outcome.line_items_failed += the_docs as u64;
                error!(
                    "💀 bulk write failed: {} docs, {} bytes, {} ms: {:#}",
                    the_docs, the_bytes, the_elapsed_ms, send_error
                );
            }
        }
    }
}

impl Worker for SinkWorker {
    fn start(self) -> JoinHandle<Result<IngestOutcome>> {
        tokio::spawn(self.drain())
    }
}
