//! 🚦 The SelectorWorker: the only stage that decides which manifests get ingested,
//! and the only owner of the checkpoint.
//!
//! There is exactly one of these per run. It reads every fetched manifest, asks
//! the predicate, forwards the accepted ones, and keeps the newest
//! `last_modified` it has accepted. Nobody else touches that value: it leaves
//! this task through the `JoinHandle` once the manifest stream is exhausted.

use anyhow::Result;
use async_channel::{Receiver, Sender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::{Worker, recv_or_cancelled, send_or_cancelled};
use crate::common::Manifest;
use crate::manifests::ManifestPredicate;
use crate::supervisors::IngestOutcome;

#[derive(Debug)]
pub(crate) struct SelectorWorker {
    predicate: ManifestPredicate,
    rx: Receiver<Manifest>,
    tx: Sender<Manifest>,
    token: CancellationToken,
}

impl SelectorWorker {
    pub(crate) fn new(
        predicate: ManifestPredicate,
        rx: Receiver<Manifest>,
        tx: Sender<Manifest>,
        token: CancellationToken,
    ) -> Self {
        Self {
            predicate,
            rx,
            tx,
            token,
        }
    }

    async fn select_all(self) -> Result<IngestOutcome> {
        let mut the_outcome = IngestOutcome::default();
        while let Some(the_manifest) = recv_or_cancelled(&self.rx, &self.token).await {
            if !self.predicate.accepts(&the_manifest) {
                trace!(
                    "🚦 already ingested: {} modified {}",
                    the_manifest.report_name, the_manifest.last_modified
                );
                the_outcome.manifests_rejected += 1;
                continue;
            }

            let the_modified = the_manifest.last_modified;
            if !send_or_cancelled(&self.tx, the_manifest, &self.token).await {
                break;
            }
            the_outcome.manifests_accepted += 1;
            the_outcome.checkpoint = the_outcome.checkpoint.max(Some(the_modified));
        }
        debug!(
            "🚦 accepted {} manifests, rejected {}, checkpoint {:?}",
            the_outcome.manifests_accepted, the_outcome.manifests_rejected, the_outcome.checkpoint
        );
        Ok(the_outcome)
    }
}

impl Worker for SelectorWorker {
    fn start(self) -> JoinHandle<Result<IngestOutcome>> {
        tokio::spawn(self.select_all())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::BillingPeriod;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 3, day, 0, 0, 0).unwrap()
    }

    fn manifest(modified: DateTime<Utc>) -> Manifest {
        Manifest {
            assembly_id: None,
            report_id: None,
            account: "1".to_string(),
            bucket: "b".to_string(),
            report_keys: vec!["k".to_string()],
            compression: "GZIP".to_string(),
            report_name: "cur".to_string(),
            billing_period: BillingPeriod {
                start: at(1),
                end: at(28),
            },
            source_bucket: "b".to_string(),
            source_region: "us-east-1".to_string(),
            last_modified: modified,
        }
    }

    async fn run_selector(predicate: ManifestPredicate, days: &[u32]) -> (IngestOutcome, usize) {
        let (in_tx, in_rx) = async_channel::unbounded();
        let (out_tx, out_rx) = async_channel::unbounded();
        for &day in days {
            in_tx.send(manifest(at(day))).await.unwrap();
        }
        drop(in_tx);
        let the_outcome = SelectorWorker::new(predicate, in_rx, out_tx, CancellationToken::new())
            .start()
            .await
            .unwrap()
            .unwrap();
        (the_outcome, out_rx.len())
    }

    #[tokio::test]
    async fn the_one_where_the_checkpoint_is_the_newest_accepted_manifest() {
        // 🔀 out of order on purpose: the max must not depend on arrival order
        let (the_outcome, the_forwarded) =
            run_selector(ManifestPredicate::modified_after(Some(at(10))), &[12, 3, 20, 9, 15]).await;

        assert_eq!(the_outcome.checkpoint, Some(at(20)));
        assert_eq!(the_outcome.manifests_accepted, 3);
        assert_eq!(the_outcome.manifests_rejected, 2);
        assert_eq!(the_forwarded, 3);
    }

    #[tokio::test]
    async fn the_one_where_rejected_manifests_never_move_the_checkpoint() {
        let the_predicate = ManifestPredicate::custom(|m| m.last_modified.format("%d").to_string() != "25");
        let (the_outcome, _) = run_selector(the_predicate, &[5, 25, 7]).await;
        assert_eq!(the_outcome.checkpoint, Some(at(7)));
    }

    #[tokio::test]
    async fn the_one_where_nothing_new_means_no_checkpoint() {
        let (the_outcome, the_forwarded) =
            run_selector(ManifestPredicate::modified_after(Some(at(28))), &[1, 2, 3]).await;
        assert_eq!(the_outcome.checkpoint, None);
        assert_eq!(the_forwarded, 0);
    }
}
