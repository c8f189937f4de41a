//! 🧾 billx: reads cloud billing exports out of an object store and bulk-loads
//! every line item into Elasticsearch, one account index at a time.
//!
//! 🎬 "It was a dark and stormy month-end. The invoices were gzipped." 🦆

pub mod app_config;
mod backends;
pub mod common;
mod fan_in;
pub mod manifests;
mod report_parts;
mod supervisors;
mod transforms;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::app_config::{AppConfig, SinkConfig};
use crate::backends::elasticsearch::ElasticsearchSink;
use crate::backends::in_mem::InMemorySink;
use crate::backends::s3::S3ObjectStore;
use crate::backends::{ObjectStoreBackend, SinkBackend};
use crate::manifests::ManifestPredicate;
use crate::supervisors::Supervisor;

pub use crate::backends::common_config::{BulkWriteAction, CommonSinkConfig};
pub use crate::backends::elasticsearch::ElasticsearchSinkConfig;
pub use crate::backends::in_mem::InMemorySinkConfig;
pub use crate::backends::s3::S3ObjectStoreConfig;
pub use crate::supervisors::IngestOutcome;

/// 🚀 Ingest one repository with a caller-chosen manifest predicate.
///
/// Connects to the bucket and the sink, then hands everything to the supervisor.
/// The caller owns `cancel`; firing it stops every stage and returns `Err`.
pub async fn ingest_repository(
    app_config: &AppConfig,
    predicate: ManifestPredicate,
    cancel: CancellationToken,
) -> Result<IngestOutcome> {
    let the_store = S3ObjectStore::new(app_config.object_store.clone())
        .await
        .context("💀 could not set up the object store client")?;
    let the_sink = match &app_config.sink_config {
        SinkConfig::Elasticsearch(es_config) => SinkBackend::Elasticsearch(
            ElasticsearchSink::new(es_config.clone())
                .await
                .context("💀 could not set up the Elasticsearch sink")?,
        ),
        SinkConfig::InMemory(_) => SinkBackend::InMemory(InMemorySink::new()),
    };

    let the_supervisor = Supervisor::new(
        app_config.runtime.clone(),
        ObjectStoreBackend::S3(the_store),
        the_sink,
        app_config.sink_config.common_config().clone(),
        app_config.sink_config.index_prefix().to_string(),
    );
    the_supervisor
        .ingest(&app_config.repository, predicate, cancel)
        .await
}

/// 🏃 The usual run: everything modified after the repository's last imported manifest.
///
/// The returned outcome carries the checkpoint to persist, via
/// [`IngestOutcome::next_checkpoint`]. Persisting it is the caller's job.
pub async fn run(app_config: &AppConfig, cancel: CancellationToken) -> Result<IngestOutcome> {
    let the_repository = &app_config.repository;
    info!(
        "🚀 billx run for account {} starting from {:?}",
        the_repository.aws_account_id, the_repository.last_imported_manifest
    );
    let the_predicate = ManifestPredicate::modified_after(the_repository.last_imported_manifest);
    ingest_repository(app_config, the_predicate, cancel).await
}
