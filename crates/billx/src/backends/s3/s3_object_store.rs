//! 🪣📡 S3 object store: list the bucket, find the region, stream the bytes.
//!
//! COLD OPEN, EXT. DATA CENTER, 3:47 AM
//!
//! The scheduler woke up and asked one question: "anything new on the bill?"
//! Answering it takes three S3 verbs (`GetBucketLocation`, `ListObjectsV2`,
//! `GetObject`) and one STS verb if the bucket belongs to somebody else.
//!
//! 🧠 Knowledge graph:
//! - `S3ObjectStoreConfig`: home region, optional role to assume, optional endpoint override
//! - Credentials are resolved ONCE per run in `new()`. A bad role fails the run right here,
//!   before a single key is listed.
//! - Clients are region-scoped and cached: a bucket in eu-west-1 gets an eu-west-1 client.
//! - `get_object` hands back the raw `AsyncRead`. The report-part reader decides how to chew it.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, SdkConfig, sts::AssumeRoleProvider};
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use aws_sdk_s3::config::Region;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info, trace};

use crate::backends::{ObjectReader, ObjectStore};
use crate::common::{ObjectKey, ObjectListing};

/// 🔧 Configuration for the S3 object store.
///
/// `role_arn` set means "this bucket belongs to a customer account, assume their role".
/// Unset means "use whatever the environment gives us" (env vars, profile, instance role).
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct S3ObjectStoreConfig {
    /// 🌎 Home region for STS and `GetBucketLocation`
    #[serde(default = "default_s3_region")]
    pub region: String,
    /// 🎭 Role to assume for the bill owner's account
    #[serde(default)]
    pub role_arn: Option<String>,
    /// 🔒 External id the bill owner's trust policy expects
    #[serde(default)]
    pub external_id: Option<String>,
    /// 🏷️ STS session name, shows up in the owner's CloudTrail
    #[serde(default = "default_session_name")]
    pub session_name: String,
    /// 🧪 Endpoint override for S3-compatible stores (MinIO, LocalStack)
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default)]
    pub force_path_style: bool,
}

impl Default for S3ObjectStoreConfig {
    fn default() -> Self {
        Self {
            region: default_s3_region(),
            role_arn: None,
            external_id: None,
            session_name: default_session_name(),
            endpoint_url: None,
            force_path_style: false,
        }
    }
}

/// 🌎 us-east-1. The Florida of AWS regions. Everyone ends up there eventually.
fn default_s3_region() -> String {
    "us-east-1".to_string()
}

fn default_session_name() -> String {
    "billx-ingest".to_string()
}

/// 🪣 S3-backed [`ObjectStore`]. Shared by every worker of a run.
pub(crate) struct S3ObjectStore {
    sdk_config: SdkConfig,
    store_config: S3ObjectStoreConfig,
    // 🔒 region → client. std Mutex: held for a HashMap lookup, never across an await.
    regional_clients: Mutex<HashMap<String, aws_sdk_s3::Client>>,
}

// 🐛 Debug impl skips the client cache, nobody wants to read a HashMap of SDK clients.
impl std::fmt::Debug for S3ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3ObjectStore")
            .field("store_config", &self.store_config)
            .finish()
    }
}

impl S3ObjectStore {
    /// 🚀 Resolve credentials (assuming a role if configured) and verify they work.
    ///
    /// 💀 Fails if: the environment has no credentials, the role cannot be assumed,
    /// or STS is having a day. All of these are repository-fatal.
    pub(crate) async fn new(store_config: S3ObjectStoreConfig) -> Result<Self> {
        let the_base_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(store_config.region.clone()))
            .load()
            .await;

        let the_sdk_config = match store_config.role_arn {
            Some(ref role_arn) => {
                debug!("🎭 assuming role {} for the bill owner's account", role_arn);
                let mut the_builder = AssumeRoleProvider::builder(role_arn)
                    .session_name(store_config.session_name.clone())
                    .configure(&the_base_config);
                if let Some(ref external_id) = store_config.external_id {
                    the_builder = the_builder.external_id(external_id.clone());
                }
                let the_provider = the_builder.build().await;
                the_base_config
                    .into_builder()
                    .credentials_provider(SharedCredentialsProvider::new(the_provider))
                    .build()
            }
            None => the_base_config,
        };

        // 🔐 One credential retrieval up front. If the keys are bad we want to hear it now,
        // not as a listing error that looks like a missing bucket.
        let the_provider = the_sdk_config
            .credentials_provider()
            .context("💀 No AWS credentials provider resolved. The environment is empty and so is our wallet.")?;
        the_provider.provide_credentials().await.with_context(|| {
            format!(
                "💀 Could not obtain AWS credentials (role: {}). Check the trust policy, the external id, and the calendar.",
                store_config.role_arn.as_deref().unwrap_or("<environment>")
            )
        })?;
        info!("🔐 AWS credentials resolved for region {}", store_config.region);

        Ok(Self {
            sdk_config: the_sdk_config,
            store_config,
            regional_clients: Mutex::new(HashMap::new()),
        })
    }

    /// 🗺️ A client pinned to `region`, built once and then cloned (clients are Arc inside).
    fn client_for(&self, region: &str) -> aws_sdk_s3::Client {
        let mut the_clients = self
            .regional_clients
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        the_clients
            .entry(region.to_string())
            .or_insert_with(|| {
                let mut the_builder = aws_sdk_s3::config::Builder::from(&self.sdk_config)
                    .region(Region::new(region.to_string()))
                    .force_path_style(self.store_config.force_path_style);
                if let Some(ref endpoint_url) = self.store_config.endpoint_url {
                    the_builder = the_builder.endpoint_url(endpoint_url.clone());
                }
                aws_sdk_s3::Client::from_conf(the_builder.build())
            })
            .clone()
    }
}

/// 🌎 `GetBucketLocation` speaks a dialect: empty means us-east-1, `EU` means eu-west-1.
pub(crate) fn normalize_location_constraint(constraint: Option<&str>) -> String {
    match constraint {
        None | Some("") => "us-east-1".to_string(),
        Some("EU") => "eu-west-1".to_string(),
        Some(other) => other.to_string(),
    }
}

fn to_chrono(timestamp: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(timestamp.secs(), timestamp.subsec_nanos())
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn bucket_region(&self, bucket: &str) -> Result<String> {
        let the_response = self
            .client_for(&self.store_config.region)
            .get_bucket_location()
            .bucket(bucket)
            .send()
            .await
            .with_context(|| {
                format!("💀 GetBucketLocation failed for '{}'. The bucket is either gone or not ours to ask about.", bucket)
            })?;
        let the_region =
            normalize_location_constraint(the_response.location_constraint().map(|c| c.as_str()));
        debug!("🌎 bucket {} lives in {}", bucket, the_region);
        Ok(the_region)
    }

    async fn list_page(
        &self,
        region: &str,
        bucket: &str,
        prefix: &str,
        continuation: Option<String>,
    ) -> Result<ObjectListing> {
        let the_response = self
            .client_for(region)
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .set_continuation_token(continuation)
            .send()
            .await
            .with_context(|| format!("💀 ListObjectsV2 failed for s3://{}/{}", bucket, prefix))?;

        let the_keys: Vec<ObjectKey> = the_response
            .contents()
            .iter()
            .filter_map(|object| {
                let key = object.key()?;
                Some(ObjectKey {
                    region: region.to_string(),
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                    last_modified: object.last_modified().and_then(to_chrono).unwrap_or_default(),
                })
            })
            .collect();

        let the_next = if the_response.is_truncated().unwrap_or(false) {
            the_response.next_continuation_token().map(str::to_string)
        } else {
            None
        };

        trace!(
            "🪣 listed {} keys from s3://{}/{} (more: {})",
            the_keys.len(),
            bucket,
            prefix,
            the_next.is_some()
        );
        Ok(ObjectListing {
            keys: the_keys,
            next_continuation: the_next,
        })
    }

    async fn get_object(&self, region: &str, bucket: &str, key: &str) -> Result<ObjectReader> {
        let the_response = self
            .client_for(region)
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .with_context(|| {
                format!(
                    "💀 GetObject failed for s3://{}/{}. Check IAM permissions, bucket policy, KMS key access.",
                    bucket, key
                )
            })?;
        Ok(Box::new(the_response.body.into_async_read()))
    }
}
