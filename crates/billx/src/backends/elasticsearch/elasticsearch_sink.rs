use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, trace, warn};

use crate::backends::{BulkOutcome, CommonSinkConfig, Sink};

/// 📡 Where the line items go, and how we prove we are allowed to put them there.
///
/// The index itself is not configured here: it is derived per run from
/// `index_prefix` and the owning account (`{prefix}-lineitems-{account}`).
/// Index templates and mappings are somebody else's job.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ElasticsearchSinkConfig {
    /// 📡 Cluster URL, scheme and port included. `localhost` alone is a wish, not a URL.
    pub url: String,
    /// 🔒 Username. The bouncer at the club. Except the club is a database.
    #[serde(default)]
    pub username: Option<String>,
    /// 🔒 Password. "password123" is not a password. It is a confession.
    #[serde(default)]
    pub password: Option<String>,
    /// 🔒 API key, the velvet rope variant of authentication. Wins over basic auth.
    #[serde(default)]
    pub api_key: Option<String>,
    /// 🏷️ First segment of every index name
    #[serde(default = "default_index_prefix")]
    pub index_prefix: String,
    /// 🔧 Flush threshold and bulk verb
    #[serde(flatten)]
    pub common_config: CommonSinkConfig,
}

fn default_index_prefix() -> String {
    "billx".to_string()
}

/// 📡 The sink side of the Elasticsearch backend: pure I/O, zero buffering.
///
/// Accepts a rendered NDJSON payload, POSTs it to `_bulk`, and turns the
/// per-item statuses into a [`BulkOutcome`]. Cloned once per sink worker; the
/// `reqwest::Client` inside is a connection pool behind an `Arc`, so clones share it.
#[derive(Debug, Clone)]
pub(crate) struct ElasticsearchSink {
    client: reqwest::Client,
    sink_config: ElasticsearchSinkConfig,
}

/// 📬 Just enough of the `_bulk` response to count winners and losers.
#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<std::collections::HashMap<String, BulkItemResult>>,
}

#[derive(Debug, Deserialize)]
struct BulkItemResult {
    status: u16,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

impl ElasticsearchSink {
    /// 🚀 Build the client and ping the cluster so a bad URL fails the run at startup,
    /// not fifty thousand line items later.
    pub(crate) async fn new(config: ElasticsearchSinkConfig) -> Result<Self> {
        // 🔧 10s to connect, 60s per bulk. Bills are chunky.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()
            .context("💀 The HTTP client refused to be born. Probably a TLS thing. It is always a TLS thing.")?;

        let the_sink = Self {
            client,
            sink_config: config,
        };

        let the_ping = the_sink
            .authorize(the_sink.client.get(&the_sink.sink_config.url))
            .send()
            .await
            .with_context(|| {
                format!(
                    "💀 Could not reach Elasticsearch at '{}'. Is it running? Is it the right port? Is it Tuesday?",
                    the_sink.sink_config.url
                )
            })?;
        if !the_ping.status().is_success() {
            anyhow::bail!(
                "💀 Elasticsearch at '{}' answered the ping with {}. Check the credentials.",
                the_sink.sink_config.url,
                the_ping.status()
            );
        }
        debug!("✅ Elasticsearch is home at {}", the_sink.sink_config.url);
        Ok(the_sink)
    }

    /// 🔒 API key beats basic auth in this club. No auth at all is also a lifestyle.
    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(ref api_key) = self.sink_config.api_key {
            request.header("Authorization", format!("ApiKey {}", api_key))
        } else if let Some(ref username) = self.sink_config.username {
            request.basic_auth(username, self.sink_config.password.as_ref())
        } else {
            request
        }
    }
}

/// 🧮 Turn a `_bulk` response body into counts. 409 is "already there", which under
/// `create` is the idempotent re-ingest, not a failure.
fn summarize_bulk_response(body: &str) -> Result<BulkOutcome> {
    let the_response: BulkResponse = serde_json::from_str(body)
        .context("💀 Elasticsearch answered the bulk request with something that is not a bulk response")?;

    let mut the_outcome = BulkOutcome::default();
    let mut the_first_error_logged = false;
    for the_item in the_response.items.iter().flat_map(|item| item.values()) {
        match the_item.status {
            200..=299 => the_outcome.written += 1,
            409 => the_outcome.already_present += 1,
            _ => {
                the_outcome.failed += 1;
                if !the_first_error_logged {
                    the_first_error_logged = true;
                    warn!(
                        "⚠️ bulk item rejected with status {}: {}",
                        the_item.status,
                        the_item.error.as_ref().map(|e| e.to_string()).unwrap_or_default()
                    );
                }
            }
        }
    }
    if the_response.errors && the_outcome.failed == 0 && the_outcome.already_present == 0 {
        warn!("⚠️ bulk response flagged errors but no item carried one. Elasticsearch is being mysterious.");
    }
    Ok(the_outcome)
}

#[async_trait]
impl Sink for ElasticsearchSink {
    /// 📡 POST the rendered NDJSON to `/_bulk` and count what stuck.
    ///
    /// 🔄 No retries here. The next scheduled run is the retry.
    async fn send(&mut self, payload: String, doc_count: usize) -> Result<BulkOutcome> {
        let bulk_url = format!("{}/_bulk", self.sink_config.url.trim_end_matches('/'));
        trace!("📡 sending {} bytes ({} docs) to {}", payload.len(), doc_count, bulk_url);

        // ⚠️ application/x-ndjson, not application/json. Elasticsearch cares. Deeply.
        let the_response = self
            .authorize(self.client.post(&bulk_url))
            .header("Content-Type", "application/x-ndjson")
            .body(payload)
            .send()
            .await
            .context("💀 The bulk request never made it to Elasticsearch. Check connectivity and timeouts.")?;

        let the_status = the_response.status();
        let the_body = the_response
            .text()
            .await
            .context("💀 Elasticsearch hung up halfway through its bulk response")?;
        if !the_status.is_success() {
            anyhow::bail!(
                "💀 Elasticsearch rejected the whole bulk request with {}: {}",
                the_status,
                the_body
            );
        }
        summarize_bulk_response(&the_body)
    }

    /// 🗑️ Nothing to flush. The sink worker sends complete payloads.
    async fn close(&mut self) -> Result<()> {
        debug!("🗑️ Elasticsearch sink closing, no buffer to flush");
        Ok(())
    }
}
