use anyhow::{Context, Result};
use async_compression::tokio::bufread::GzipDecoder;
use tokio::io::BufReader;
use tracing::debug;

use super::ReportPart;
use crate::backends::{ObjectReader, ObjectStore};
use crate::common::SUPPORTED_COMPRESSION;

/// 📖 Open a streaming, decompressing reader over one report part.
///
/// The compression check runs before any byte is downloaded, so an
/// unsupported scheme costs nothing but a log line. Gzip streams may carry
/// several members back to back and all of them are read.
pub(crate) async fn open_report_part(store: &dyn ObjectStore, part: &ReportPart) -> Result<ObjectReader> {
    if !part.compression.eq_ignore_ascii_case(SUPPORTED_COMPRESSION) {
        anyhow::bail!(
            "💀 unsupported compression '{}' for report part s3://{}/{} of manifest {}",
            part.compression,
            part.bucket,
            part.key,
            part.manifest
        );
    }

    let the_raw = store
        .get_object(&part.region, &part.bucket, &part.key)
        .await
        .with_context(|| {
            format!(
                "💀 could not open report part s3://{}/{} of manifest {}",
                part.bucket, part.key, part.manifest
            )
        })?;
    debug!("📖 opened s3://{}/{} ({})", part.bucket, part.key, part.compression);

    let mut the_decoder = GzipDecoder::new(BufReader::new(the_raw));
    the_decoder.multiple_members(true);
    Ok(Box::new(the_decoder))
}
