//! 📜 The ManifestFetchWorker: picks manifest-shaped keys out of the listing
//! and turns them into parsed [`Manifest`]s. Everything else it ignores.
//!
//! A manifest that will not download or will not parse is somebody's bad
//! day, not the run's. It gets an error line with its key and a counter.
//! The two counters differ on purpose: a failed download holds the
//! checkpoint back, a body that does not parse never will parse.

use std::sync::Arc;

use anyhow::Result;
use async_channel::{Receiver, Sender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::{Worker, recv_or_cancelled, send_or_cancelled};
use crate::backends::ObjectStoreBackend;
use crate::common::{Manifest, ObjectKey};
use crate::manifests::{download_manifest, is_manifest_key};
use crate::supervisors::IngestOutcome;

#[derive(Debug)]
pub(crate) struct ManifestFetchWorker {
    store: Arc<ObjectStoreBackend>,
    rx: Receiver<ObjectKey>,
    tx: Sender<Manifest>,
    max_manifest_bytes: usize,
    token: CancellationToken,
}

impl ManifestFetchWorker {
    pub(crate) fn new(
        store: Arc<ObjectStoreBackend>,
        rx: Receiver<ObjectKey>,
        tx: Sender<Manifest>,
        max_manifest_bytes: usize,
        token: CancellationToken,
    ) -> Self {
        Self {
            store,
            rx,
            tx,
            max_manifest_bytes,
            token,
        }
    }

    async fn fetch_all(self) -> Result<IngestOutcome> {
        let mut the_outcome = IngestOutcome::default();
        while let Some(the_key) = recv_or_cancelled(&self.rx, &self.token).await {
            if !is_manifest_key(&the_key.key) {
                continue;
            }
            the_outcome.manifests_seen += 1;

            let the_download = tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                downloaded = download_manifest(self.store.as_ref(), &the_key, self.max_manifest_bytes) => downloaded,
            };
            let the_body = match the_download {
                Ok(body) => body,
                Err(download_error) => {
                    the_outcome.manifests_unreachable += 1;
                    error!("📡 could not download manifest s3://{}/{}: {:#}", the_key.bucket, the_key.key, download_error);
                    continue;
                }
            };
            match Manifest::from_slice(&the_body, &the_key) {
                Ok(the_manifest) => {
                    debug!(
                        "📜 manifest {} for {} ({} parts)",
                        the_key.key,
                        the_manifest.billing_period.start,
                        the_manifest.report_keys.len()
                    );
                    if !send_or_cancelled(&self.tx, the_manifest, &self.token).await {
                        break;
                    }
                }
                Err(parse_error) => {
                    the_outcome.manifests_failed += 1;
                    error!("💀 skipping manifest s3://{}/{}: {:#}", the_key.bucket, the_key.key, parse_error);
                }
            }
        }
        Ok(the_outcome)
    }
}

impl Worker for ManifestFetchWorker {
    fn start(self) -> JoinHandle<Result<IngestOutcome>> {
        tokio::spawn(self.fetch_all())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::in_mem::InMemoryObjectStore;
    use chrono::{TimeZone, Utc};

    const GOOD: &str = r#"{"account": "1", "bucket": "bills", "reportKeys": ["cur/p.csv.gz"],
        "compression": "GZIP", "reportName": "cur",
        "billingPeriod": {"start": "20230101T000000.000Z", "end": "20230201T000000.000Z"}}"#;

    fn key(name: &str) -> ObjectKey {
        ObjectKey {
            region: "us-east-1".to_string(),
            bucket: "bills".to_string(),
            key: name.to_string(),
            last_modified: Utc.with_ymd_and_hms(2023, 1, 2, 0, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn the_one_where_broken_and_vanished_manifests_are_counted_apart() {
        let now = Utc::now();
        let the_store = InMemoryObjectStore::new()
            .with_object("bills", "cur/20230101-20230201/cur-Manifest.json", GOOD, now)
            .with_object("bills", "cur/20221201-20230101/cur-Manifest.json", "{ not json", now)
            .with_object("bills", "cur/20230101-20230201/abc/cur-1.csv.gz", "zzz", now);

        let (keys_tx, keys_rx) = async_channel::unbounded();
        let (manifests_tx, manifests_rx) = async_channel::unbounded();
        for name in [
            "cur/20230101-20230201/cur-Manifest.json",
            "cur/20221201-20230101/cur-Manifest.json",
            // 👻 listed, then gone before we got to it
            "cur/20221101-20221201/cur-Manifest.json",
            "cur/20230101-20230201/abc/cur-1.csv.gz",
        ] {
            keys_tx.send(key(name)).await.unwrap();
        }
        drop(keys_tx);

        let the_outcome = ManifestFetchWorker::new(
            Arc::new(ObjectStoreBackend::InMemory(the_store)),
            keys_rx,
            manifests_tx,
            32 * 1024,
            CancellationToken::new(),
        )
        .start()
        .await
        .unwrap()
        .unwrap();

        assert_eq!(the_outcome.manifests_seen, 3);
        assert_eq!(the_outcome.manifests_failed, 1);
        assert_eq!(the_outcome.manifests_unreachable, 1);
        assert!(!the_outcome.is_confirmed());
        let the_manifest = manifests_rx.recv().await.unwrap();
        assert_eq!(the_manifest.last_modified, key("x").last_modified);
        assert!(manifests_rx.recv().await.is_err());
    }
}
