//! 📦 The ManifestWorker: turns one accepted manifest into one stream of line items.
//!
//! 🎬 *[a manifest arrives. it lists forty parts in a bucket we have never met.]*
//! *[the worker asks where that bucket lives, opens a fan-in, and calls for help.]*
//!
//! Per manifest: resolve the parts' region, open a manifest-level fan-in,
//! register its output with the run-level fan-in, and let a small crew of
//! [`PartWorker`]s read the parts into it. The manifest's stream closes when
//! its last part is done.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_channel::Receiver;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::part_worker::PartWorker;
use super::{Worker, recv_or_cancelled, send_or_cancelled};
use crate::backends::{ObjectStore, ObjectStoreBackend};
use crate::common::{LineItem, Manifest};
use crate::fan_in::{FanInRegistrar, fan_in};
use crate::report_parts::ReportPart;
use crate::supervisors::IngestOutcome;

#[derive(Debug)]
pub(crate) struct ManifestWorker {
    store: Arc<ObjectStoreBackend>,
    rx: Receiver<Manifest>,
    registrar: FanInRegistrar<LineItem>,
    part_workers: usize,
    queue_capacity: usize,
    token: CancellationToken,
}

impl ManifestWorker {
    pub(crate) fn new(
        store: Arc<ObjectStoreBackend>,
        rx: Receiver<Manifest>,
        registrar: FanInRegistrar<LineItem>,
        part_workers: usize,
        queue_capacity: usize,
        token: CancellationToken,
    ) -> Self {
        Self {
            store,
            rx,
            registrar,
            part_workers,
            queue_capacity,
            token,
        }
    }

    async fn process_all(self) -> Result<IngestOutcome> {
        let mut the_outcome = IngestOutcome::default();
        while let Some(the_manifest) = recv_or_cancelled(&self.rx, &self.token).await {
            the_outcome.merge(self.process(the_manifest).await?);
        }
        Ok(the_outcome)
    }

    /// 🌎 Parts usually sit next to their manifest. When they don't, ask.
    async fn parts_region(&self, manifest: &Manifest) -> Option<Result<String>> {
        if manifest.bucket == manifest.source_bucket {
            return Some(Ok(manifest.source_region.clone()));
        }
        tokio::select! {
            biased;
            _ = self.token.cancelled() => None,
            region = self.store.bucket_region(&manifest.bucket) => Some(region),
        }
    }

    async fn process(&self, manifest: Manifest) -> Result<IngestOutcome> {
        let mut the_outcome = IngestOutcome::default();
        let the_label = manifest.label();

        let the_region = match self.parts_region(&manifest).await {
            None => return Ok(the_outcome),
            Some(Ok(region)) => region,
            Some(Err(region_error)) => {
                error!(
                    "💀 skipping manifest {}: cannot locate report bucket '{}': {:#}",
                    the_label, manifest.bucket, region_error
                );
                the_outcome.parts_skipped += manifest.report_keys.len();
                return Ok(the_outcome);
            }
        };
        info!(
            "📦 ingesting manifest {} ({} parts, period starting {})",
            the_label,
            manifest.report_keys.len(),
            manifest.billing_period.start
        );

        let (the_manifest_registrar, the_manifest_stream) = fan_in::<LineItem>(self.queue_capacity);
        self.registrar
            .register(the_manifest_stream)
            .await
            .with_context(|| format!("💀 nobody is draining line items anymore (manifest {})", the_label))?;

        let (parts_tx, parts_rx) = async_channel::bounded(self.queue_capacity.max(1));
        let the_crew: Vec<_> = (0..self.part_workers.max(1))
            .map(|_| {
                PartWorker::new(
                    self.store.clone(),
                    parts_rx.clone(),
                    the_manifest_registrar.clone(),
                    self.queue_capacity,
                    self.token.clone(),
                )
                .start()
            })
            .collect();
        drop(parts_rx);
        drop(the_manifest_registrar);

        for the_key in &manifest.report_keys {
            let the_part = ReportPart {
                region: the_region.clone(),
                bucket: manifest.bucket.clone(),
                key: the_key.clone(),
                compression: manifest.compression.clone(),
                manifest: the_label.clone(),
            };
            if !send_or_cancelled(&parts_tx, the_part, &self.token).await {
                break;
            }
        }
        drop(parts_tx);

        for the_joined in futures::future::join_all(the_crew).await {
            let the_part_outcome = the_joined
                .with_context(|| format!("💀 a part worker for manifest {} panicked", the_label))??;
            the_outcome.merge(the_part_outcome);
        }
        debug!(
            "✅ manifest {} done: {} parts read, {} incomplete, {} malformed, {} skipped",
            the_label,
            the_outcome.parts_read,
            the_outcome.parts_incomplete,
            the_outcome.parts_malformed,
            the_outcome.parts_skipped
        );
        Ok(the_outcome)
    }
}

impl Worker for ManifestWorker {
    fn start(self) -> JoinHandle<Result<IngestOutcome>> {
        tokio::spawn(self.process_all())
    }
}
