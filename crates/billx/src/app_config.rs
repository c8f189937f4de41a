//! 🔧 App Configuration: the TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." (every developer at 3am) 🦆
//!
//! 🏗️ Powered by Figment, because hand-parsing env vars is a form of
//! self-harm that even the borrow checker wouldn't approve of.

use std::path::Path;

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

use crate::backends::common_config::CommonSinkConfig;
use crate::backends::elasticsearch::ElasticsearchSinkConfig;
use crate::backends::in_mem::InMemorySinkConfig;
use crate::backends::s3::S3ObjectStoreConfig;
use crate::common::BillRepository;

/// 📦 Everything one ingestion run needs to know, in one place.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// 🏦 Which bills, and where we left off last time
    pub repository: BillRepository,
    /// 🪣 How to reach the bucket
    #[serde(default)]
    pub object_store: S3ObjectStoreConfig,
    pub sink_config: SinkConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// 🚰 Where the line items end up.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub enum SinkConfig {
    Elasticsearch(ElasticsearchSinkConfig),
    /// 🧪 Keeps everything in RAM. Dry runs and local poking.
    InMemory(InMemorySinkConfig),
}

/// 🏷️ Index prefix used when the sink has no opinion of its own.
pub const DEFAULT_INDEX_PREFIX: &str = "billx";

impl SinkConfig {
    pub fn common_config(&self) -> &CommonSinkConfig {
        match self {
            SinkConfig::Elasticsearch(config) => &config.common_config,
            SinkConfig::InMemory(config) => &config.common_config,
        }
    }

    pub fn index_prefix(&self) -> &str {
        match self {
            SinkConfig::Elasticsearch(config) => &config.index_prefix,
            SinkConfig::InMemory(_) => DEFAULT_INDEX_PREFIX,
        }
    }
}

/// 🧵 Worker counts and buffer sizes. The defaults are deliberately stingy:
/// hand-off queues, two of everything, and a slow sink slows the whole run
/// instead of filling the heap.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RuntimeConfig {
    /// ✉️ Slots in every stage-to-stage channel. 1 is a hand-off.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// 📜 Manifest fetchers, and manifests processed at the same time
    #[serde(default = "default_two")]
    pub manifest_fetchers: usize,
    /// 🧾 Report parts read at the same time, per manifest
    #[serde(default = "default_two")]
    pub part_workers_per_manifest: usize,
    /// 🚰 Sink workers draining the merged line-item stream
    #[serde(default = "default_two")]
    pub sink_parallelism: usize,
    /// 🪣 Listing stops once this many keys were seen
    #[serde(default = "default_max_scanned_objects")]
    pub max_scanned_objects: usize,
    /// 📜 Bytes read from a manifest before we stop caring
    #[serde(default = "default_max_manifest_bytes")]
    pub max_manifest_bytes: usize,
}

fn default_queue_capacity() -> usize {
    1
}

fn default_two() -> usize {
    2
}

fn default_max_scanned_objects() -> usize {
    1000
}

fn default_max_manifest_bytes() -> usize {
    32 * 1024
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            manifest_fetchers: default_two(),
            part_workers_per_manifest: default_two(),
            sink_parallelism: default_two(),
            max_scanned_objects: default_max_scanned_objects(),
            max_manifest_bytes: default_max_manifest_bytes(),
        }
    }
}

/// 🚀 Load the config from env vars, a TOML file, or both.
///
/// 🔧 Environment variables prefixed `BILLX_` form the base layer, with `__`
/// separating nesting levels (`BILLX_REPOSITORY__BUCKET=...`). A TOML file,
/// when given, is merged on top and wins on conflicts. No file given means
/// env only: no silent fallback to some `billx.toml` in the working directory.
///
/// 💀 Returns an error if the merged result does not deserialize. The message
/// says which sources were involved.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    let config = Figment::new().merge(Env::prefixed("BILLX_").split("__"));
    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (BILLX_*). \
             The file exists in our hearts, but apparently not on disk, or not in this shape.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (BILLX_*). \
                 No file was provided, so this one is all on the environment. Classic."
            .to_string(),
    };

    config.extract().context(context_msg)
}
