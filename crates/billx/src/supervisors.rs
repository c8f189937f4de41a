//! 🎬 *[camera pans across a dimly lit server room]*
//! 🎬 *[dramatic orchestral music swells]*
//! 🎬 "In a world where billing exports pile up endlessly..."
//! 🎬 "One supervisor dared to ingest them all."
//! 🎬 *[record scratch]* 🦆
//!
//! 📦 The Supervisor module: part middle manager, part helicopter parent.
//!
//! ```text
//!  Enumerator ──keys──▶ ManifestFetch ×N ──manifests──▶ Selector ──accepted──▶ ManifestWorker ×N
//!                                                          │                        │ per manifest:
//!                                                     checkpoint                    │ fan-in ◀── PartWorker ×K
//!                                                          ▼                        ▼
//!                                                     IngestOutcome ◀──────  run fan-in ──▶ SinkWorker ×S
//! ```
//!
//! Every arrow is a bounded `async_channel`. A slow sink stalls the fan-ins,
//! which stall the part readers, which stall the downloads. Memory stays flat.
//!
//! ⚠️ WORKERS ARE THE SUPERVISOR'S PRIVATE LITTLE MINIONS. DO NOT MAKE THEM PUB.

mod workers;

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::app_config::RuntimeConfig;
use crate::backends::{CommonSinkConfig, ObjectStore, ObjectStoreBackend, SinkBackend};
use crate::common::{BillRepository, LineItem};
use crate::fan_in::fan_in;
use crate::manifests::ManifestPredicate;
use crate::transforms::BulkTarget;
use workers::{EnumeratorWorker, ManifestFetchWorker, ManifestWorker, SelectorWorker, SinkWorker, Worker};

/// 📊 What one run did, and where the checkpoint stands.
///
/// Every worker returns its own slice of this. The supervisor adds them up.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestOutcome {
    pub objects_scanned: usize,
    /// 📜 keys that looked like manifests
    pub manifests_seen: usize,
    /// 📡 manifests whose download failed. Worth another try next run.
    pub manifests_unreachable: usize,
    /// 💀 manifests that downloaded but would not parse or validate
    pub manifests_failed: usize,
    pub manifests_accepted: usize,
    pub manifests_rejected: usize,
    pub parts_read: usize,
    /// 🚫 parts never opened: unreachable bucket, missing object, bad compression
    pub parts_skipped: usize,
    /// 🛑 parts cut short because the exporter was still writing them
    pub parts_incomplete: usize,
    pub parts_malformed: usize,
    /// 📡 parts whose byte stream broke partway through
    pub parts_interrupted: usize,
    pub line_items_decoded: usize,
    pub line_items_indexed: u64,
    pub line_items_already_present: u64,
    pub line_items_failed: u64,
    pub payloads_failed: usize,
    /// ⏱️ newest `last_modified` among accepted manifests, `None` if nothing was accepted
    pub checkpoint: Option<DateTime<Utc>>,
}

impl IngestOutcome {
    pub(crate) fn merge(&mut self, other: IngestOutcome) {
        self.objects_scanned += other.objects_scanned;
        self.manifests_seen += other.manifests_seen;
        self.manifests_unreachable += other.manifests_unreachable;
        self.manifests_failed += other.manifests_failed;
        self.manifests_accepted += other.manifests_accepted;
        self.manifests_rejected += other.manifests_rejected;
        self.parts_read += other.parts_read;
        self.parts_skipped += other.parts_skipped;
        self.parts_incomplete += other.parts_incomplete;
        self.parts_malformed += other.parts_malformed;
        self.parts_interrupted += other.parts_interrupted;
        self.line_items_decoded += other.line_items_decoded;
        self.line_items_indexed += other.line_items_indexed;
        self.line_items_already_present += other.line_items_already_present;
        self.line_items_failed += other.line_items_failed;
        self.payloads_failed += other.payloads_failed;
        self.checkpoint = self.checkpoint.max(other.checkpoint);
    }

    /// ✅ Did every accepted manifest make it into the index in full?
    ///
    /// No rejected documents, no failed payloads, no part left unread, cut
    /// short or dropped mid-stream, and no manifest lost to a failed download.
    /// Malformed parts and unparsable manifests do not count against it:
    /// rereading them gives the same broken bytes every time.
    pub fn is_confirmed(&self) -> bool {
        self.line_items_failed == 0
            && self.payloads_failed == 0
            && self.parts_skipped == 0
            && self.parts_incomplete == 0
            && self.parts_interrupted == 0
            && self.manifests_unreachable == 0
    }

    /// ⏱️ The checkpoint the caller should persist after this run.
    ///
    /// Moves forward only when the run is confirmed. Otherwise the previous
    /// checkpoint stays, the same manifests are accepted next time, and
    /// create semantics turn the documents that did land into harmless 409s.
    pub fn next_checkpoint(&self, previous: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        if self.is_confirmed() {
            previous.max(self.checkpoint)
        } else {
            previous
        }
    }
}

/// 📦 The Supervisor: spawns one crew per stage, wires the channels, waits,
/// and adds up the results.
#[derive(Debug)]
pub(crate) struct Supervisor {
    runtime: RuntimeConfig,
    store: Arc<ObjectStoreBackend>,
    sink: SinkBackend,
    sink_config: CommonSinkConfig,
    index_prefix: String,
}

impl Supervisor {
    pub(crate) fn new(
        runtime: RuntimeConfig,
        store: ObjectStoreBackend,
        sink: SinkBackend,
        sink_config: CommonSinkConfig,
        index_prefix: String,
    ) -> Self {
        Self {
            runtime,
            store: Arc::new(store),
            sink,
            sink_config,
            index_prefix,
        }
    }

    /// 🧵 Run the whole pipeline once for `repository`.
    ///
    /// 💀 Returns `Err` only for repository-fatal problems: the bucket cannot be
    /// located or listed, a stage crashed, or `cancel` fired. Everything finer
    /// grained is logged where it happens and counted in the outcome.
    pub(crate) async fn ingest(
        &self,
        repository: &BillRepository,
        predicate: ManifestPredicate,
        cancel: CancellationToken,
    ) -> Result<IngestOutcome> {
        let the_lookup = tokio::select! {
            biased;
            _ = cancel.cancelled() => anyhow::bail!("🚪 ingestion of s3://{} was cancelled", repository.bucket),
            region = self.store.bucket_region(&repository.bucket) => region,
        };
        let the_region =
            the_lookup.with_context(|| format!("💀 cannot locate billing bucket '{}'", repository.bucket))?;
        info!(
            "🏦 ingesting s3://{}/{} ({}) since {:?}",
            repository.bucket, repository.prefix, the_region, repository.last_imported_manifest
        );

        let the_capacity = self.runtime.queue_capacity.max(1);
        let the_target = BulkTarget::for_account(
            &self.index_prefix,
            &repository.aws_account_id,
            self.sink_config.write_action,
        );
        let (keys_tx, keys_rx) = async_channel::bounded(the_capacity);
        let (fetched_tx, fetched_rx) = async_channel::bounded(the_capacity);
        let (accepted_tx, accepted_rx) = async_channel::bounded(the_capacity);
        let (the_run_registrar, the_run_stream) = fan_in::<LineItem>(the_capacity);

        let the_enumerator = EnumeratorWorker::new(
            self.store.clone(),
            the_region,
            repository.bucket.clone(),
            repository.prefix.clone(),
            self.runtime.max_scanned_objects,
            keys_tx,
            cancel.clone(),
        )
        .start();

        let the_fetchers: Vec<_> = (0..self.runtime.manifest_fetchers.max(1))
            .map(|_| {
                ManifestFetchWorker::new(
                    self.store.clone(),
                    keys_rx.clone(),
                    fetched_tx.clone(),
                    self.runtime.max_manifest_bytes,
                    cancel.clone(),
                )
                .start()
            })
            .collect();
        drop(keys_rx);
        drop(fetched_tx);

        let the_selector = SelectorWorker::new(predicate, fetched_rx, accepted_tx, cancel.clone()).start();

        let the_manifest_workers: Vec<_> = (0..self.runtime.manifest_fetchers.max(1))
            .map(|_| {
                ManifestWorker::new(
                    self.store.clone(),
                    accepted_rx.clone(),
                    the_run_registrar.clone(),
                    self.runtime.part_workers_per_manifest,
                    the_capacity,
                    cancel.clone(),
                )
                .start()
            })
            .collect();
        drop(accepted_rx);
        drop(the_run_registrar);

        let the_sink_workers: Vec<_> = (0..self.runtime.sink_parallelism.max(1))
            .map(|_| {
                SinkWorker::new(
                    the_run_stream.clone(),
                    self.sink.clone(),
                    the_target.clone(),
                    self.sink_config.clone(),
                    cancel.clone(),
                )
                .start()
            })
            .collect();
        drop(the_run_stream);

        // 🧮 wait for every stage, even after a failure, so nothing is left running
        let mut the_outcome = IngestOutcome::default();
        let mut the_first_error: Option<anyhow::Error> = None;
        let the_stages = std::iter::once(("enumerator", the_enumerator))
            .chain(the_fetchers.into_iter().map(|h| ("manifest fetcher", h)))
            .chain(std::iter::once(("selector", the_selector)))
            .chain(the_manifest_workers.into_iter().map(|h| ("manifest worker", h)))
            .chain(the_sink_workers.into_iter().map(|h| ("sink worker", h)));
        for (the_stage, the_handle) in the_stages {
            match join_stage(the_stage, the_handle).await {
                Ok(part) => the_outcome.merge(part),
                Err(stage_error) => {
                    the_first_error.get_or_insert(stage_error);
                }
            }
        }

        if cancel.is_cancelled() {
            anyhow::bail!("🚪 ingestion of s3://{} was cancelled", repository.bucket);
        }
        if let Some(the_error) = the_first_error {
            return Err(the_error);
        }
        info!(
            "🏁 s3://{}: {} manifests accepted, {} parts read, {} line items indexed, {} failed, checkpoint {:?} ({})",
            repository.bucket,
            the_outcome.manifests_accepted,
            the_outcome.parts_read,
            the_outcome.line_items_indexed,
            the_outcome.line_items_failed,
            the_outcome.checkpoint,
            if the_outcome.is_confirmed() { "confirmed" } else { "held back" }
        );
        Ok(the_outcome)
    }
}

async fn join_stage(stage: &str, handle: JoinHandle<Result<IngestOutcome>>) -> Result<IngestOutcome> {
    handle
        .await
        .with_context(|| format!("💀 the {} task panicked", stage))?
        .with_context(|| format!("💀 the {} failed", stage))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::common_config::BulkWriteAction;
    use crate::backends::in_mem::{InMemoryObjectStore, InMemorySink};
    use chrono::TimeZone;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    const HEADER: &str = "identity/LineItemId,identity/TimeInterval,bill/InvoiceId,lineItem/UnblendedCost,resourceTags/user:team\n";

    fn gzip(text: &str) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(text.as_bytes()).unwrap();
        encoder.finish().unwrap()
    }

    fn rows(prefix: &str, count: usize) -> String {
        let mut the_csv = HEADER.to_string();
        for n in 0..count {
            the_csv.push_str(&format!("{prefix}-{n},2023-02-01T00:00:00Z/2023-02-01T01:00:00Z,INV1,0.25,web\n"));
        }
        the_csv
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 1, 31, 0, 0, 0).unwrap()
    }

    fn manifest_body(parts_bucket: &str, keys: &[&str]) -> String {
        let the_keys = keys.iter().map(|k| format!("\"{k}\"")).collect::<Vec<_>>().join(",");
        format!(
            r#"{{"assemblyId": "abc", "account": "123456789012", "bucket": "{parts_bucket}",
                "reportKeys": [{the_keys}], "compression": "GZIP", "reportName": "cur",
                "billingPeriod": {{"start": "20230201T000000.000Z", "end": "20230301T000000.000Z"}}}}"#
        )
    }

    const MANIFEST: &str = "cur/20230201-20230301/cur-Manifest.json";
    const PART_1: &str = "cur/20230201-20230301/abc/cur-1.csv.gz";
    const PART_2: &str = "cur/20230201-20230301/abc/cur-2.csv.gz";

    fn the_bill_store() -> InMemoryObjectStore {
        let the_modified = t0() + chrono::Duration::days(2);
        InMemoryObjectStore::new()
            .with_object("bills", MANIFEST, manifest_body("bills", &[PART_1, PART_2]), the_modified)
            .with_object("bills", PART_1, gzip(&rows("a", 3)), the_modified)
            .with_object("bills", PART_2, gzip(&rows("b", 3)), the_modified)
            .with_object("bills", "cur/unrelated.txt", "hello", the_modified)
    }

    fn the_repository() -> BillRepository {
        BillRepository {
            bucket: "bills".to_string(),
            prefix: "cur/".to_string(),
            last_imported_manifest: Some(t0()),
            next_update: None,
            error: None,
            aws_account_id: "123456789012".to_string(),
        }
    }

    fn the_supervisor(store: InMemoryObjectStore, sink: InMemorySink) -> Supervisor {
        Supervisor::new(
            RuntimeConfig::default(),
            ObjectStoreBackend::InMemory(store),
            SinkBackend::InMemory(sink),
            CommonSinkConfig {
                max_request_size_bytes: 512,
                write_action: BulkWriteAction::Create,
            },
            "billx".to_string(),
        )
    }

    async fn ingest(store: InMemoryObjectStore, sink: InMemorySink) -> Result<IngestOutcome> {
        let the_repository = the_repository();
        the_supervisor(store, sink)
            .ingest(
                &the_repository,
                ManifestPredicate::modified_after(the_repository.last_imported_manifest),
                CancellationToken::new(),
            )
            .await
    }

    #[tokio::test]
    async fn the_one_where_one_manifest_two_parts_six_rows_become_six_documents() {
        let the_sink = InMemorySink::new();
        let the_outcome = ingest(the_bill_store(), the_sink.clone()).await.unwrap();

        assert_eq!(the_outcome.objects_scanned, 4);
        assert_eq!(the_outcome.manifests_seen, 1);
        assert_eq!(the_outcome.manifests_accepted, 1);
        assert_eq!(the_outcome.parts_read, 2);
        assert_eq!(the_outcome.line_items_decoded, 6);
        assert_eq!(the_outcome.line_items_indexed, 6);
        assert_eq!(the_sink.document_count().await, 6);

        let the_manifest_modified = t0() + chrono::Duration::days(2);
        assert!(the_outcome.is_confirmed());
        assert_eq!(the_outcome.checkpoint, Some(the_manifest_modified));
        assert!(the_outcome.next_checkpoint(Some(t0())) >= Some(the_manifest_modified));

        let the_docs = the_sink.documents.lock().await;
        assert!(the_docs.keys().all(|(index, _)| index == "billx-lineitems-123456789012"));
    }

    #[tokio::test]
    async fn the_one_where_running_it_again_changes_nothing() {
        let the_sink = InMemorySink::new();
        ingest(the_bill_store(), the_sink.clone()).await.unwrap();
        // 🔁 same checkpoint, so the same manifest is accepted again
        let the_rerun = ingest(the_bill_store(), the_sink.clone()).await.unwrap();

        assert_eq!(the_rerun.line_items_indexed, 0);
        assert_eq!(the_rerun.line_items_already_present, 6);
        assert_eq!(the_sink.document_count().await, 6);
    }

    #[tokio::test]
    async fn the_one_where_a_sink_outage_holds_the_checkpoint_back() {
        let the_sink = InMemorySink::new().failing_next(1);
        let the_outcome = ingest(the_bill_store(), the_sink.clone()).await.unwrap();

        assert_eq!(the_outcome.payloads_failed, 1);
        assert!(!the_outcome.is_confirmed());
        assert!(the_outcome.checkpoint.is_some());
        assert_eq!(the_outcome.next_checkpoint(Some(t0())), Some(t0()));
    }

    #[tokio::test]
    async fn the_one_where_a_half_written_part_keeps_its_sibling_and_holds_the_checkpoint() {
        let the_modified = t0() + chrono::Duration::days(2);
        let the_half_written = format!("{HEADER}c-0,i,INV1,1,web\nc-1,i,,1,web\nc-2,i,INV1,1,web\n");
        let the_store = the_bill_store().with_object("bills", PART_2, gzip(&the_half_written), the_modified);
        let the_sink = InMemorySink::new();

        let the_outcome = ingest(the_store, the_sink.clone()).await.unwrap();

        assert_eq!(the_outcome.parts_read, 1);
        assert_eq!(the_outcome.parts_incomplete, 1);
        assert_eq!(the_sink.document_count().await, 4);
        assert_eq!(the_outcome.next_checkpoint(Some(t0())), Some(t0()));
    }

    #[tokio::test]
    async fn the_one_where_parts_in_another_bucket_are_found_by_region() {
        let the_modified = t0() + chrono::Duration::days(2);
        let the_store = InMemoryObjectStore::new()
            .with_region("bills", "us-west-2")
            .with_region("staging", "eu-central-1")
            .with_object("bills", MANIFEST, manifest_body("staging", &[PART_1]), the_modified)
            .with_object("staging", PART_1, gzip(&rows("s", 2)), the_modified);
        let the_sink = InMemorySink::new();

        let the_outcome = ingest(the_store, the_sink.clone()).await.unwrap();
        assert_eq!(the_outcome.line_items_indexed, 2);
    }

    #[tokio::test]
    async fn the_one_where_an_unreachable_parts_bucket_skips_only_that_manifest() {
        let the_modified = t0() + chrono::Duration::days(2);
        let the_store = InMemoryObjectStore::new()
            .with_failing_bucket("staging")
            .with_object("bills", MANIFEST, manifest_body("staging", &[PART_1, PART_2]), the_modified);

        let the_outcome = ingest(the_store, InMemorySink::new()).await.unwrap();
        assert_eq!(the_outcome.parts_skipped, 2);
        assert!(!the_outcome.is_confirmed());
    }

    #[tokio::test]
    async fn the_one_where_an_old_manifest_is_left_alone() {
        let the_store = InMemoryObjectStore::new()
            .with_object("bills", MANIFEST, manifest_body("bills", &[PART_1]), t0())
            .with_object("bills", PART_1, gzip(&rows("a", 3)), t0());
        let the_sink = InMemorySink::new();

        let the_outcome = ingest(the_store, the_sink.clone()).await.unwrap();
        assert_eq!(the_outcome.manifests_rejected, 1);
        assert_eq!(the_outcome.checkpoint, None);
        assert_eq!(the_outcome.next_checkpoint(Some(t0())), Some(t0()));
        assert_eq!(the_sink.document_count().await, 0);
    }

    #[tokio::test]
    async fn the_one_where_an_unlistable_bucket_fails_the_run() {
        let the_store = the_bill_store().with_failing_bucket("bills");
        assert!(ingest(the_store, InMemorySink::new()).await.is_err());
    }

    #[tokio::test]
    async fn the_one_where_a_part_cut_off_mid_download_holds_the_checkpoint() {
        let the_modified = t0() + chrono::Duration::days(2);
        let mut the_cut_short = gzip(&rows("b", 3));
        // ✂️ lose the trailer and a bit of the deflate stream, like a dropped connection would
        the_cut_short.truncate(the_cut_short.len() - 12);
        let the_store = the_bill_store().with_object("bills", PART_2, the_cut_short, the_modified);
        let the_sink = InMemorySink::new();

        let the_outcome = ingest(the_store, the_sink.clone()).await.unwrap();

        assert_eq!(the_outcome.parts_read, 1);
        assert_eq!(the_outcome.parts_interrupted, 1);
        assert_eq!(the_outcome.parts_malformed, 0);
        assert!(the_sink.document_count().await < 6);
        assert!(!the_outcome.is_confirmed());
        assert_eq!(the_outcome.next_checkpoint(Some(t0())), Some(t0()));

        // 🔁 next run, the download goes through and the missing rows show up
        let the_rerun = ingest(the_bill_store(), the_sink.clone()).await.unwrap();
        assert!(the_rerun.is_confirmed());
        assert_eq!(the_sink.document_count().await, 6);
        assert_eq!(the_rerun.next_checkpoint(Some(t0())), Some(the_modified));
    }

    #[tokio::test]
    async fn the_one_where_cancelling_mid_run_stops_every_stage() {
        let the_modified = t0() + chrono::Duration::days(2);
        let the_keys: Vec<String> = (0..50)
            .map(|n| format!("cur/20230201-20230301/abc/cur-{n}.csv.gz"))
            .collect();
        let the_key_refs: Vec<&str> = the_keys.iter().map(String::as_str).collect();
        let mut the_store = InMemoryObjectStore::new().with_object(
            "bills",
            MANIFEST,
            manifest_body("bills", &the_key_refs),
            the_modified,
        );
        for (n, the_key) in the_keys.iter().enumerate() {
            the_store = the_store.with_object("bills", the_key, gzip(&rows(&format!("p{n}"), 2000)), the_modified);
        }

        let the_repository = the_repository();
        let the_cancel = CancellationToken::new();
        let the_trigger = the_cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            the_trigger.cancel();
        });

        let the_supervisor = the_supervisor(the_store, InMemorySink::new());
        let the_result = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            the_supervisor.ingest(
                &the_repository,
                ManifestPredicate::modified_after(the_repository.last_imported_manifest),
                the_cancel,
            ),
        )
        .await
        .expect("a cancelled run should wind down well within five seconds");

        assert!(the_result.unwrap_err().to_string().contains("cancelled"));
    }

    #[tokio::test]
    async fn the_one_where_a_cancelled_run_says_so() {
        let the_repository = the_repository();
        let the_cancel = CancellationToken::new();
        the_cancel.cancel();
        let the_result = the_supervisor(the_bill_store(), InMemorySink::new())
            .ingest(&the_repository, ManifestPredicate::modified_after(None), the_cancel)
            .await;
        assert!(the_result.unwrap_err().to_string().contains("cancelled"));
    }

    #[test]
    fn the_one_where_the_checkpoint_never_moves_backwards() {
        let the_outcome = IngestOutcome {
            checkpoint: Some(t0()),
            ..Default::default()
        };
        let the_later = t0() + chrono::Duration::days(1);
        assert_eq!(the_outcome.next_checkpoint(Some(the_later)), Some(the_later));
        assert_eq!(the_outcome.next_checkpoint(None), Some(t0()));
    }
}
