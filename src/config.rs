//! TOML configuration parsing.
//!
//! The configuration file is read once by the binary and turned into the
//! explicit settings structs each client takes at construction. Nothing in
//! the refresh pipeline looks configuration up on its own.
//!
//! ```toml
//! [db]
//! path = "./data/lqs.sqlite"
//!
//! [staging]
//! bucket = "list-search-staging"
//! region = "us-east-1"
//!
//! [index]
//! poll_interval_ms = 1000
//! max_polls = 600
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::index_client::PollPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub list: ListConfig,
    pub staging: StagingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ListConfig {
    #[serde(default = "default_list_endpoint")]
    pub endpoint: String,
    /// Environment variable holding the bearer token for list reads.
    #[serde(default = "default_access_token_env")]
    pub access_token_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ListConfig {
    fn default() -> Self {
        Self {
            endpoint: default_list_endpoint(),
            access_token_env: default_access_token_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_list_endpoint() -> String {
    "https://graph.microsoft.com/v1.0".to_string()
}
fn default_access_token_env() -> String {
    "GRAPH_ACCESS_TOKEN".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct StagingConfig {
    pub bucket: String,
    pub region: String,
    #[serde(default)]
    pub prefix: String,
    /// Custom S3-compatible endpoint (MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// When set, locators are `<public_base_url>/<key>` instead of presigned URLs.
    #[serde(default)]
    pub public_base_url: Option<String>,
    #[serde(default = "default_locator_ttl_secs")]
    pub locator_ttl_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_locator_ttl_secs() -> u64 {
    3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_endpoint")]
    pub endpoint: String,
    /// Environment variable holding the index subscription key.
    #[serde(default = "default_subscription_key_env")]
    pub subscription_key_env: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            endpoint: default_index_endpoint(),
            subscription_key_env: default_subscription_key_env(),
            poll_interval_ms: default_poll_interval_ms(),
            max_polls: default_max_polls(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl IndexConfig {
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(self.poll_interval_ms),
            max_polls: self.max_polls,
        }
    }
}

fn default_index_endpoint() -> String {
    "https://westus.api.cognitive.microsoft.com/qnamaker/v4.0".to_string()
}
fn default_subscription_key_env() -> String {
    "QNA_SUBSCRIPTION_KEY".to_string()
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_max_polls() -> u32 {
    600
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    #[serde(default = "default_max_concurrent_refreshes")]
    pub max_concurrent_refreshes: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
            max_concurrent_refreshes: default_max_concurrent_refreshes(),
        }
    }
}

fn default_tick_interval_secs() -> u64 {
    3600
}
fn default_max_concurrent_refreshes() -> usize {
    4
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate staging
    if config.staging.bucket.trim().is_empty() {
        anyhow::bail!("staging.bucket must not be empty");
    }
    if config.staging.region.trim().is_empty() {
        anyhow::bail!("staging.region must not be empty");
    }
    if config.staging.public_base_url.is_none() && config.staging.locator_ttl_secs == 0 {
        anyhow::bail!("staging.locator_ttl_secs must be > 0 when no public_base_url is set");
    }

    // Validate index polling
    if config.index.poll_interval_ms == 0 {
        anyhow::bail!("index.poll_interval_ms must be > 0");
    }
    if config.index.max_polls == 0 {
        anyhow::bail!("index.max_polls must be > 0");
    }

    // Validate scheduler
    if config.scheduler.tick_interval_secs == 0 {
        anyhow::bail!("scheduler.tick_interval_secs must be > 0");
    }
    if config.scheduler.max_concurrent_refreshes == 0 {
        anyhow::bail!("scheduler.max_concurrent_refreshes must be > 0");
    }

    Ok(config)
}
