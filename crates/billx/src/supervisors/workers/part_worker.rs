//! 🧾 The PartWorker: opens report parts one after another and decodes them
//! into their own channel, registered with the manifest's fan-in.
//!
//! A few of these run per manifest. They share a queue of parts, so a
//! manifest with forty parts is read two (or however many) at a time, not
//! forty at once.

use std::sync::Arc;

use anyhow::Result;
use async_channel::Receiver;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::error;

use super::{Worker, recv_or_cancelled};
use crate::backends::ObjectStoreBackend;
use crate::common::LineItem;
use crate::fan_in::FanInRegistrar;
use crate::report_parts::{PartEnd, ReportPart, decode_part, open_report_part};
use crate::supervisors::IngestOutcome;

#[derive(Debug)]
pub(crate) struct PartWorker {
    store: Arc<ObjectStoreBackend>,
    rx: Receiver<ReportPart>,
    registrar: FanInRegistrar<LineItem>,
    queue_capacity: usize,
    token: CancellationToken,
}

impl PartWorker {
    pub(crate) fn new(
        store: Arc<ObjectStoreBackend>,
        rx: Receiver<ReportPart>,
        registrar: FanInRegistrar<LineItem>,
        queue_capacity: usize,
        token: CancellationToken,
    ) -> Self {
        Self {
            store,
            rx,
            registrar,
            queue_capacity,
            token,
        }
    }

    async fn read_all(self) -> Result<IngestOutcome> {
        let mut the_outcome = IngestOutcome::default();
        while let Some(the_part) = recv_or_cancelled(&self.rx, &self.token).await {
            let the_open = tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                opened = open_report_part(self.store.as_ref(), &the_part) => opened,
            };
            let the_reader = match the_open {
                Ok(reader) => reader,
                Err(open_error) => {
                    error!("💀 skipping report part: {:#}", open_error);
                    the_outcome.parts_skipped += 1;
                    continue;
                }
            };

            let (tx, rx) = async_channel::bounded(self.queue_capacity.max(1));
            self.registrar.register(rx).await?;
            // 🎟️ this part's own token: the guard may cancel it, siblings never notice
            let the_part_token = self.token.child_token();
            let the_decoded = decode_part(the_reader, &the_part, &tx, &the_part_token).await;
            drop(tx);

            the_outcome.line_items_decoded += the_decoded.emitted;
            match the_decoded.end {
                PartEnd::Complete => the_outcome.parts_read += 1,
                PartEnd::Incomplete => the_outcome.parts_incomplete += 1,
                PartEnd::Malformed => the_outcome.parts_malformed += 1,
                PartEnd::Interrupted => the_outcome.parts_interrupted += 1,
                PartEnd::Cancelled => break,
            }
        }
        Ok(the_outcome)
    }
}

impl Worker for PartWorker {
    fn start(self) -> JoinHandle<Result<IngestOutcome>> {
        tokio::spawn(self.read_all())
    }
}
