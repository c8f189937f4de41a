//! 🪣 The EnumeratorWorker: pages through a bucket listing and hands every key
//! downstream, until the listing ends or the scan budget runs out.
//!
//! 🎬 *[a bucket with a million objects. eleven of them are bills.]*
//! *[the enumerator does not know which eleven. it has a budget.]*

use std::sync::Arc;

use anyhow::{Context, Result};
use async_channel::Sender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{Worker, send_or_cancelled};
use crate::backends::{ObjectStore, ObjectStoreBackend};
use crate::common::ObjectKey;
use crate::supervisors::IngestOutcome;

#[derive(Debug)]
pub(crate) struct EnumeratorWorker {
    store: Arc<ObjectStoreBackend>,
    region: String,
    bucket: String,
    prefix: String,
    max_scanned_objects: usize,
    tx: Sender<ObjectKey>,
    token: CancellationToken,
}

impl EnumeratorWorker {
    pub(crate) fn new(
        store: Arc<ObjectStoreBackend>,
        region: String,
        bucket: String,
        prefix: String,
        max_scanned_objects: usize,
        tx: Sender<ObjectKey>,
        token: CancellationToken,
    ) -> Self {
        Self {
            store,
            region,
            bucket,
            prefix,
            max_scanned_objects,
            tx,
            token,
        }
    }

    async fn enumerate(self) -> Result<IngestOutcome> {
        let mut the_outcome = IngestOutcome::default();
        let mut the_continuation: Option<String> = None;
        loop {
            let the_listing = tokio::select! {
                biased;
                _ = self.token.cancelled() => return Ok(the_outcome),
                page = self.store.list_page(&self.region, &self.bucket, &self.prefix, the_continuation.take()) => page,
            };
            let the_page = the_listing.with_context(|| {
                format!(
                    "💀 listing s3://{}/{} failed after {} keys",
                    self.bucket, self.prefix, the_outcome.objects_scanned
                )
            })?;

            for the_key in the_page.keys {
                if !send_or_cancelled(&self.tx, the_key, &self.token).await {
                    return Ok(the_outcome);
                }
                the_outcome.objects_scanned += 1;
            }

            // 🧮 the budget is checked per page, so the last page always goes out whole
            if the_outcome.objects_scanned >= self.max_scanned_objects {
                if the_page.next_continuation.is_some() {
                    warn!(
                        "⚠️ s3://{}/{} has more than {} objects, stopped listing after {}. \
                         Billing exports share this prefix with something else.",
                        self.bucket, self.prefix, self.max_scanned_objects, the_outcome.objects_scanned
                    );
                }
                break;
            }
            match the_page.next_continuation {
                Some(next) => the_continuation = Some(next),
                None => break,
            }
        }
        debug!("🏁 listed {} keys from s3://{}/{}", the_outcome.objects_scanned, self.bucket, self.prefix);
        Ok(the_outcome)
    }
}

impl Worker for EnumeratorWorker {
    fn start(self) -> JoinHandle<Result<IngestOutcome>> {
        tokio::spawn(self.enumerate())
    }
}
