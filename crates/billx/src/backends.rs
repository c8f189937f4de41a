//! 🔌 Backends: where the real I/O happens.
//!
//! 🪣 Object stores hand us bills, 🚰 sinks swallow line items.
//! Everything in between is CPU and channels.
//!
//! Same shape on both ends: a trait for the contract, concrete impls per
//! backend, and an enum that dispatches so the supervisor never needs to know
//! whether it is talking to AWS or to a `HashMap` in a test. 🦆

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::common::ObjectListing;

pub(crate) mod common_config;
pub(crate) mod elasticsearch;
pub(crate) mod in_mem;
pub(crate) mod s3;

pub(crate) use common_config::CommonSinkConfig;

// ===== Object store trait and backend enum =====

/// 📖 A streaming body. Boxed because every backend hands back a different opaque reader
/// and struct fields cannot hold `impl Trait`.
pub(crate) type ObjectReader = Box<dyn AsyncRead + Send + Unpin>;

/// 🪣 Read-only view of an object store: list, locate, fetch.
///
/// # Contract 📜
/// - `list_page` returns one page of keys plus a continuation token, or `None` on the last page.
/// - `bucket_region` answers where a bucket lives. Region-scoped clients need it.
/// - `get_object` opens a byte stream. Callers decide whether to slurp or stream.
/// - Implementations are shared across every worker of a run, hence `&self` + `Send + Sync`.
#[async_trait]
pub(crate) trait ObjectStore: std::fmt::Debug + Send + Sync {
    async fn bucket_region(&self, bucket: &str) -> Result<String>;

    async fn list_page(
        &self,
        region: &str,
        bucket: &str,
        prefix: &str,
        continuation: Option<String>,
    ) -> Result<ObjectListing>;

    async fn get_object(&self, region: &str, bucket: &str, key: &str) -> Result<ObjectReader>;
}

/// 🎭 The many faces of an object store. Tests get RAM, production gets S3.
#[derive(Debug)]
pub(crate) enum ObjectStoreBackend {
    S3(s3::S3ObjectStore),
    #[cfg(test)]
    InMemory(in_mem::InMemoryObjectStore),
}

#[async_trait]
impl ObjectStore for ObjectStoreBackend {
    async fn bucket_region(&self, bucket: &str) -> Result<String> {
        match self {
            ObjectStoreBackend::S3(s3) => s3.bucket_region(bucket).await,
            #[cfg(test)]
            ObjectStoreBackend::InMemory(mem) => mem.bucket_region(bucket).await,
        }
    }

    async fn list_page(
        &self,
        region: &str,
        bucket: &str,
        prefix: &str,
        continuation: Option<String>,
    ) -> Result<ObjectListing> {
        match self {
            ObjectStoreBackend::S3(s3) => s3.list_page(region, bucket, prefix, continuation).await,
            #[cfg(test)]
            ObjectStoreBackend::InMemory(mem) => {
                mem.list_page(region, bucket, prefix, continuation).await
            }
        }
    }

    async fn get_object(&self, region: &str, bucket: &str, key: &str) -> Result<ObjectReader> {
        match self {
            ObjectStoreBackend::S3(s3) => s3.get_object(region, bucket, key).await,
            #[cfg(test)]
            ObjectStoreBackend::InMemory(mem) => mem.get_object(region, bucket, key).await,
        }
    }
}

// ===== Sink trait and backend enum =====

/// 📬 What the index said about one bulk payload.
///
/// `already_present` counts documents rejected because their id exists. Under
/// create semantics that is the idempotent re-ingest case, not a failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct BulkOutcome {
    pub written: u64,
    pub already_present: u64,
    pub failed: u64,
}

/// 🕳️ A sink that sends pre-rendered bulk payloads. Pure I/O, zero logic.
///
/// # Contract 📜
/// - `send` accepts a fully rendered NDJSON bulk body and reports per-document results.
///   A transport-level failure is an `Err`; document-level rejections are counted in the outcome.
/// - `close` flushes, finalizes, and says goodbye. MUST be called.
/// - Buffering and rendering happen in the sink worker, NOT here.
#[async_trait]
pub(crate) trait Sink: std::fmt::Debug + Send {
    async fn send(&mut self, payload: String, doc_count: usize) -> Result<BulkOutcome>;
    async fn close(&mut self) -> Result<()>;
}

/// 🎭 The many faces of a sink. Clone is cheap: every variant shares its client/state.
#[derive(Debug, Clone)]
pub(crate) enum SinkBackend {
    InMemory(in_mem::InMemorySink),
    Elasticsearch(elasticsearch::ElasticsearchSink),
}

#[async_trait]
impl Sink for SinkBackend {
    async fn send(&mut self, payload: String, doc_count: usize) -> Result<BulkOutcome> {
        match self {
            SinkBackend::InMemory(sink) => sink.send(payload, doc_count).await,
            SinkBackend::Elasticsearch(sink) => sink.send(payload, doc_count).await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            SinkBackend::InMemory(sink) => sink.close().await,
            SinkBackend::Elasticsearch(sink) => sink.close().await,
        }
    }
}
