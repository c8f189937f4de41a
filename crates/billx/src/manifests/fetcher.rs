use anyhow::{Context, Result};
use tokio::io::AsyncReadExt;
use tracing::trace;

use crate::backends::ObjectStore;
use crate::common::ObjectKey;

/// 📥 Download at most `max_bytes` of a manifest body. Parsing is the caller's move.
///
/// An `Err` here means the bytes never arrived (missing object, denied, dropped
/// connection), which a later run may get past. Anything past the cap is never
/// read, so an oversized manifest comes back as a truncated body that then fails
/// to parse, like any other broken manifest.
pub(crate) async fn download_manifest(
    store: &dyn ObjectStore,
    key: &ObjectKey,
    max_bytes: usize,
) -> Result<Vec<u8>> {
    let the_reader = store
        .get_object(&key.region, &key.bucket, &key.key)
        .await
        .with_context(|| format!("💀 could not open manifest s3://{}/{}", key.bucket, key.key))?;

    let mut the_body = Vec::with_capacity(max_bytes.min(8 * 1024));
    the_reader
        .take(max_bytes as u64)
        .read_to_end(&mut the_body)
        .await
        .with_context(|| format!("💀 manifest s3://{}/{} stopped streaming halfway", key.bucket, key.key))?;
    trace!("📜 read {} bytes of s3://{}/{}", the_body.len(), key.bucket, key.key);
    Ok(the_body)
}
