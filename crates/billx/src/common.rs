//! 📦 Common data structures: the nouns of billx.
//!
//! 🎬 COLD OPEN. INT. FINANCE DEPARTMENT, THE FIRST OF THE MONTH
//!
//! Somebody asked "why is the cloud bill so big?" and nobody could answer,
//! because the answer was sitting in an S3 bucket as four hundred gzipped CSV
//! files and a JSON manifest that politely pointed at all of them.
//!
//! This module holds the types that ferry that answer through the pipeline:
//! where the bills live ([`BillRepository`]), what we found in the bucket
//! ([`ObjectKey`]), what the manifest told us ([`Manifest`]), and the rows
//! themselves ([`LineItem`]). They do not do I/O. They carry data. 🦆

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};

// ============================================================
//  🏦 BillRepository: where the bills live
// ============================================================

/// 🏦 A configured billing-export location, owned by whoever manages accounts.
///
/// The pipeline treats this as read-only input. It hands a new checkpoint back
/// to the caller and the caller decides what to persist. We are guests here.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct BillRepository {
    /// 🪣 Bucket the billing exports are listed from
    pub bucket: String,
    /// 🗂️ Key prefix under which the exports live
    #[serde(default)]
    pub prefix: String,
    /// ⏱️ Last successfully ingested manifest modification time (the checkpoint)
    #[serde(default)]
    pub last_imported_manifest: Option<DateTime<Utc>>,
    /// 📅 When the scheduler plans the next run. Carried, never read by the pipeline.
    #[serde(default)]
    pub next_update: Option<DateTime<Utc>>,
    /// 💀 Last repository-level error text, as persisted by the caller
    #[serde(default)]
    pub error: Option<String>,
    /// 🆔 Owning account, used to name the target index
    pub aws_account_id: String,
}

// ============================================================
//  🔑 ObjectKey: one thing we found in a bucket
// ============================================================

/// 🔑 One listed object. Transient: born in the enumerator, dead by the fetcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectKey {
    pub region: String,
    pub bucket: String,
    pub key: String,
    pub last_modified: DateTime<Utc>,
}

/// 📄 One page of a bucket listing. `next_continuation` is `None` on the last page.
#[derive(Debug, Clone, Default)]
pub struct ObjectListing {
    pub keys: Vec<ObjectKey>,
    pub next_continuation: Option<String>,
}

// ============================================================
//  📜 Manifest: the table of contents of one billing export
// ============================================================

/// 🗜️ The one compression scheme we know how to stream.
pub const SUPPORTED_COMPRESSION: &str = "GZIP";

/// 📅 Billing period boundaries, as encoded in manifests: `20230101T000000.000Z`.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct BillingPeriod {
    #[serde(deserialize_with = "deserialize_manifest_timestamp")]
    pub start: DateTime<Utc>,
    #[serde(deserialize_with = "deserialize_manifest_timestamp")]
    pub end: DateTime<Utc>,
}

/// 📜 Parsed descriptor of one billing export.
///
/// `bucket` is where the report parts live (straight from the manifest body).
/// `source_bucket` is where the manifest itself was listed from. Providers may
/// stage the two separately, so both are kept.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub assembly_id: Option<String>,
    #[serde(default)]
    pub report_id: Option<String>,
    pub account: String,
    pub bucket: String,
    #[serde(default)]
    pub report_keys: Vec<String>,
    #[serde(default)]
    pub compression: String,
    #[serde(default)]
    pub report_name: String,
    pub billing_period: BillingPeriod,
    /// 🪣 Stamped from the listing, never read from the body
    #[serde(skip)]
    pub source_bucket: String,
    /// 🌎 Region of `source_bucket`, stamped from the listing
    #[serde(skip)]
    pub source_region: String,
    /// ⏱️ Stamped from the listing, never read from the body
    #[serde(skip)]
    pub last_modified: DateTime<Utc>,
}

impl Manifest {
    /// 📜 Parse a manifest body and stamp the provenance fields from the key it came from.
    ///
    /// Rejects manifests with no report keys or an unsupported compression.
    /// Those are not worth downloading parts for.
    pub fn from_slice(body: &[u8], origin: &ObjectKey) -> Result<Self> {
        let mut the_manifest: Manifest = serde_json::from_slice(body).with_context(|| {
            format!(
                "💀 s3://{}/{} does not parse as a billing manifest ({} bytes read)",
                origin.bucket,
                origin.key,
                body.len()
            )
        })?;
        the_manifest.source_bucket = origin.bucket.clone();
        the_manifest.source_region = origin.region.clone();
        the_manifest.last_modified = origin.last_modified;
        the_manifest.validate()?;
        Ok(the_manifest)
    }

    /// ✅ A manifest is usable iff it names at least one part and a compression we can read.
    pub fn validate(&self) -> Result<()> {
        if self.report_keys.is_empty() {
            anyhow::bail!(
                "💀 Manifest '{}' for account {} lists no report keys. A table of contents with no chapters.",
                self.report_name,
                self.account
            );
        }
        if !self.compression_supported() {
            anyhow::bail!(
                "💀 Manifest '{}' uses compression '{}', we only speak {}",
                self.report_name,
                self.compression,
                SUPPORTED_COMPRESSION
            );
        }
        Ok(())
    }

    pub fn compression_supported(&self) -> bool {
        self.compression.eq_ignore_ascii_case(SUPPORTED_COMPRESSION)
    }

    /// 🏷️ `reportName@assemblyId`, short enough for a log line, unique enough to grep for.
    pub fn label(&self) -> String {
        format!("{}@{}", self.report_name, self.assembly_id.as_deref().unwrap_or("-"))
    }
}

/// 🕰️ Parse the manifest timestamp encoding, `%Y%m%dT%H%M%S%.3fZ`.
pub fn parse_manifest_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let the_naive = NaiveDateTime::parse_from_str(raw, "%Y%m%dT%H%M%S%.fZ")
        .with_context(|| format!("💀 '{}' is not a manifest timestamp (want 20230101T000000.000Z)", raw))?;
    Ok(the_naive.and_utc())
}

fn deserialize_manifest_timestamp<'de, D>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_manifest_timestamp(&raw).map_err(serde::de::Error::custom)
}

// ============================================================
//  🧾 LineItem: one row of the bill
// ============================================================

/// 🧾 One normalized billing record.
///
/// `any` collects every column we do not map to a field. `tags` is filled in
/// later from `any` by tag extraction, which empties `any`. Only `tags` is
/// ever persisted.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub line_item_id: String,
    pub time_interval: String,
    pub invoice_id: String,
    pub usage_account_id: String,
    pub usage_start_date: Option<DateTime<Utc>>,
    pub usage_end_date: Option<DateTime<Utc>>,
    pub product_code: String,
    pub usage_type: String,
    pub operation: String,
    pub availability_zone: String,
    pub resource_id: String,
    pub currency_code: String,
    pub unblended_cost: f64,
    #[serde(skip)]
    pub any: HashMap<String, String>,
    pub tags: BTreeMap<String, String>,
}

impl LineItem {
    /// 🔐 Deterministic document identity: hex SHA-256 of `TimeInterval/LineItemId`.
    ///
    /// Same row, same id, every run. That is what keeps re-ingestion from duplicating.
    pub fn document_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.time_interval.as_bytes());
        hasher.update(b"/");
        hasher.update(self.line_item_id.as_bytes());
        let the_digest = hasher.finalize();
        let mut out = String::with_capacity(the_digest.len() * 2);
        for byte in the_digest {
            let _ = write!(&mut out, "{:02x}", byte);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn the_origin() -> ObjectKey {
        ObjectKey {
            region: "us-west-2".to_string(),
            bucket: "listing-bucket".to_string(),
            key: "cur/20230101-20230201/cur-Manifest.json".to_string(),
            last_modified: Utc.with_ymd_and_hms(2023, 1, 15, 8, 0, 0).unwrap(),
        }
    }

    #[test]
    fn the_one_where_a_manifest_keeps_both_buckets() {
        let the_body = br#"{
            "assemblyId": "abc",
            "account": "123456789012",
            "bucket": "report-bucket",
            "reportKeys": ["cur/20230101-20230201/abc/cur-1.csv.gz"],
            "compression": "GZIP",
            "reportName": "cur",
            "billingPeriod": {"start": "20230101T000000.000Z", "end": "20230201T000000.000Z"}
        }"#;

        let the_manifest = Manifest::from_slice(the_body, &the_origin()).unwrap();

        assert_eq!(the_manifest.bucket, "report-bucket");
        assert_eq!(the_manifest.source_bucket, "listing-bucket");
        assert_eq!(the_manifest.source_region, "us-west-2");
        assert_eq!(the_manifest.label(), "cur@abc");
        assert_eq!(the_manifest.last_modified, the_origin().last_modified);
        assert_eq!(
            the_manifest.billing_period.start,
            Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn the_one_where_empty_report_keys_make_a_manifest_unusable() {
        let the_body = br#"{
            "account": "1", "bucket": "b", "reportKeys": [], "compression": "GZIP",
            "reportName": "cur",
            "billingPeriod": {"start": "20230101T000000.000Z", "end": "20230201T000000.000Z"}
        }"#;
        assert!(Manifest::from_slice(the_body, &the_origin()).is_err());
    }

    #[test]
    fn the_one_where_zip_is_not_gzip() {
        let the_body = br#"{
            "account": "1", "bucket": "b", "reportKeys": ["k"], "compression": "ZIP",
            "reportName": "cur",
            "billingPeriod": {"start": "20230101T000000.000Z", "end": "20230201T000000.000Z"}
        }"#;
        assert!(Manifest::from_slice(the_body, &the_origin()).is_err());
    }

    #[test]
    fn the_one_where_a_truncated_body_fails_to_parse() {
        let the_body = br#"{"account": "1", "bucket": "b", "reportKe"#;
        assert!(Manifest::from_slice(the_body, &the_origin()).is_err());
    }

    #[test]
    fn the_one_where_document_ids_are_deterministic() {
        let the_item = LineItem {
            line_item_id: "li-1".to_string(),
            time_interval: "2023-01-01T00:00:00Z/2023-01-01T01:00:00Z".to_string(),
            ..Default::default()
        };
        let the_twin = the_item.clone();
        let the_cousin = LineItem {
            line_item_id: "li-2".to_string(),
            ..the_item.clone()
        };

        assert_eq!(the_item.document_id(), the_twin.document_id());
        assert_ne!(the_item.document_id(), the_cousin.document_id());
        assert_eq!(the_item.document_id().len(), 64);
    }

    #[test]
    fn the_one_where_the_catch_all_never_reaches_the_index() {
        let mut the_item = LineItem::default();
        the_item.any.insert("pricing/term".to_string(), "OnDemand".to_string());
        let the_json = serde_json::to_value(&the_item).unwrap();
        assert!(the_json.get("any").is_none());
        assert!(the_json.get("unblendedCost").is_some());
    }
}
