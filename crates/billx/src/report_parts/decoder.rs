//! 🔤 CSV rows in, `LineItem`s out. One part, strictly in order.
//!
//! The header row decides which column feeds which field. Columns we do not
//! know about (there are hundreds: pricing, reservation, savings plan, every
//! resource tag anyone ever invented) go into `LineItem::any` untouched.
//!
//! Order matters here and only here: the incomplete-report guard asks "was
//! that the last row?", and that question has no answer if rows are shuffled.

use anyhow::{Context, Result};
use async_channel::Sender;
use chrono::{DateTime, Utc};
use csv_async::{AsyncReaderBuilder, ErrorKind, StringRecord};
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::ReportPart;
use super::guard::{GuardVerdict, IncompleteReportGuard};
use crate::common::LineItem;

/// 🏁 How the read of one part ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PartEnd {
    /// ✅ end of stream, every row emitted
    Complete,
    /// 🛑 empty invoice id before the last row, part cut short
    Incomplete,
    /// 💀 a row (or the header) did not decode. Rereading gives the same row.
    Malformed,
    /// 📡 the byte stream broke: dropped connection, gzip cut off before its trailer
    Interrupted,
    /// 🚪 the run was cancelled or nobody downstream is listening
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DecodedPart {
    pub emitted: usize,
    pub end: PartEnd,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Column {
    LineItemId,
    TimeInterval,
    InvoiceId,
    UsageAccountId,
    UsageStartDate,
    UsageEndDate,
    ProductCode,
    UsageType,
    Operation,
    AvailabilityZone,
    ResourceId,
    CurrencyCode,
    UnblendedCost,
    Other(String),
}

impl Column {
    fn from_header(name: &str) -> Self {
        match name {
            "identity/LineItemId" => Self::LineItemId,
            "identity/TimeInterval" => Self::TimeInterval,
            "bill/InvoiceId" => Self::InvoiceId,
            "lineItem/UsageAccountId" => Self::UsageAccountId,
            "lineItem/UsageStartDate" => Self::UsageStartDate,
            "lineItem/UsageEndDate" => Self::UsageEndDate,
            "lineItem/ProductCode" => Self::ProductCode,
            "lineItem/UsageType" => Self::UsageType,
            "lineItem/Operation" => Self::Operation,
            "lineItem/AvailabilityZone" => Self::AvailabilityZone,
            "lineItem/ResourceId" => Self::ResourceId,
            "lineItem/CurrencyCode" => Self::CurrencyCode,
            "lineItem/UnblendedCost" => Self::UnblendedCost,
            other => Self::Other(other.to_string()),
        }
    }
}

/// 🗺️ Header position → field. Built once per part.
#[derive(Debug)]
struct ColumnMap(Vec<Column>);

impl ColumnMap {
    fn from_headers(headers: &StringRecord) -> Self {
        Self(headers.iter().map(Column::from_header).collect())
    }

    fn decode(&self, record: &StringRecord) -> Result<LineItem> {
        let mut the_item = LineItem::default();
        for (column, value) in self.0.iter().zip(record.iter()) {
            match column {
                Column::LineItemId => the_item.line_item_id = value.to_string(),
                Column::TimeInterval => the_item.time_interval = value.to_string(),
                Column::InvoiceId => the_item.invoice_id = value.to_string(),
                Column::UsageAccountId => the_item.usage_account_id = value.to_string(),
                Column::UsageStartDate => the_item.usage_start_date = parse_usage_date(value)?,
                Column::UsageEndDate => the_item.usage_end_date = parse_usage_date(value)?,
                Column::ProductCode => the_item.product_code = value.to_string(),
                Column::UsageType => the_item.usage_type = value.to_string(),
                Column::Operation => the_item.operation = value.to_string(),
                Column::AvailabilityZone => the_item.availability_zone = value.to_string(),
                Column::ResourceId => the_item.resource_id = value.to_string(),
                Column::CurrencyCode => the_item.currency_code = value.to_string(),
                Column::UnblendedCost => the_item.unblended_cost = parse_cost(value)?,
                Column::Other(name) => {
                    the_item.any.insert(name.clone(), value.to_string());
                }
            }
        }
        Ok(the_item)
    }
}

fn parse_usage_date(raw: &str) -> Result<Option<DateTime<Utc>>> {
    if raw.is_empty() {
        return Ok(None);
    }
    let the_date = DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("💀 '{}' is not an RFC 3339 usage date", raw))?;
    Ok(Some(the_date.with_timezone(&Utc)))
}

fn parse_cost(raw: &str) -> Result<f64> {
    if raw.is_empty() {
        return Ok(0.0);
    }
    raw.parse::<f64>()
        .with_context(|| format!("💀 '{}' is not a cost. Finance will want a word.", raw))
}

/// 🔤 Decode one part into `output`, guarded, until it ends one way or another.
///
/// Never fails: every way a part can go wrong is local to the part, gets logged
/// here with the key and manifest, and comes back as a [`PartEnd`]. Rows already
/// sent stay sent.
///
/// `token` belongs to this part alone. The guard cancels it when it finds an
/// empty invoice id before the last row. The run cancels it (through its parent)
/// when the whole run is called off.
pub(crate) async fn decode_part<R>(
    reader: R,
    part: &ReportPart,
    output: &Sender<LineItem>,
    token: &CancellationToken,
) -> DecodedPart
where
    R: AsyncRead + Unpin + Send,
{
    let mut the_csv = AsyncReaderBuilder::new().has_headers(true).create_reader(reader);
    let mut the_emitted = 0usize;
    let done = |emitted, end| DecodedPart { emitted, end };

    let the_headers = tokio::select! {
        biased;
        _ = token.cancelled() => return done(0, PartEnd::Cancelled),
        headers = the_csv.headers() => headers.map(StringRecord::clone),
    };
    let the_columns = match the_headers {
        Ok(headers) => ColumnMap::from_headers(&headers),
        Err(header_error) if is_transport_error(&header_error) => {
            return interrupted(part, 0, &header_error);
        }
        Err(header_error) => {
            error!(
                "💀 could not read the header of s3://{}/{} (manifest {}): {}",
                part.bucket, part.key, part.manifest, header_error
            );
            return done(0, PartEnd::Malformed);
        }
    };

    let mut the_guard = IncompleteReportGuard::new();
    let mut the_record = StringRecord::new();
    loop {
        let the_read = tokio::select! {
            biased;
            _ = token.cancelled() => return done(the_emitted, PartEnd::Cancelled),
            read = the_csv.read_record(&mut the_record) => read,
        };
        match the_read {
            Ok(true) => {}
            Ok(false) => break,
            Err(row_error) if is_transport_error(&row_error) => {
                return interrupted(part, the_emitted, &row_error);
            }
            Err(_) if the_guard.is_holding() => return stop_incomplete(part, token, the_emitted),
            Err(row_error) => {
                error!(
                    "💀 malformed row in s3://{}/{} (manifest {}) after {} line items: {}",
                    part.bucket, part.key, part.manifest, the_emitted, row_error
                );
                return done(the_emitted, PartEnd::Malformed);
            }
        }

        // 🛡️ any row after a held one, broken or not, means the exporter is still going
        if the_guard.is_holding() {
            return stop_incomplete(part, token, the_emitted);
        }

        let the_item = match the_columns.decode(&the_record) {
            Ok(item) => item,
            Err(decode_error) => {
                error!(
                    "💀 undecodable row {} in s3://{}/{} (manifest {}): {:#}",
                    the_record.position().map(|p| p.line()).unwrap_or_default(),
                    part.bucket,
                    part.key,
                    part.manifest,
                    decode_error
                );
                return done(the_emitted, PartEnd::Malformed);
            }
        };

        match the_guard.observe(the_item) {
            GuardVerdict::Emit(item) => {
                if !emit(output, token, item).await {
                    return done(the_emitted, PartEnd::Cancelled);
                }
                the_emitted += 1;
            }
            GuardVerdict::Hold => {}
            GuardVerdict::Incomplete => return stop_incomplete(part, token, the_emitted),
        }
    }

    if let Some(the_footer) = the_guard.finish() {
        if !emit(output, token, the_footer).await {
            return done(the_emitted, PartEnd::Cancelled);
        }
        the_emitted += 1;
    }
    debug!("✅ s3://{}/{} done, {} line items", part.bucket, part.key, the_emitted);
    done(the_emitted, PartEnd::Complete)
}

/// 📡 The bytes stopped, not the bill. A rerun may well read the whole thing.
fn is_transport_error(read_error: &csv_async::Error) -> bool {
    matches!(read_error.kind(), ErrorKind::Io(_))
}

fn interrupted(part: &ReportPart, emitted: usize, read_error: &csv_async::Error) -> DecodedPart {
    error!(
        "📡 s3://{}/{} (manifest {}) stopped streaming after {} line items: {}",
        part.bucket, part.key, part.manifest, emitted, read_error
    );
    DecodedPart {
        emitted,
        end: PartEnd::Interrupted,
    }
}

fn stop_incomplete(part: &ReportPart, token: &CancellationToken, emitted: usize) -> DecodedPart {
    info!(
        "🛑 s3://{}/{} (manifest {}) is still being written, stopping after {} line items",
        part.bucket, part.key, part.manifest, emitted
    );
    token.cancel();
    DecodedPart {
        emitted,
        end: PartEnd::Incomplete,
    }
}

async fn emit(output: &Sender<LineItem>, token: &CancellationToken, item: LineItem) -> bool {
    tokio::select! {
        biased;
        _ = token.cancelled() => false,
        sent = output.send(item) => sent.is_ok(),
    }
}
