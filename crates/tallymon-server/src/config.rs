use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tallymon_common::duration::compact;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub alert: AlertConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            storage: StorageConfig::default(),
            query: QueryConfig::default(),
            alert: AlertConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Look-back window used when a graph request omits `window`.
    #[serde(default = "default_window", with = "compact")]
    pub default_window: Duration,
    #[serde(default = "default_bucket", with = "compact")]
    pub default_bucket: Duration,
    /// Deadline for one aggregate query when the caller gives none.
    #[serde(default = "default_query_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_window: default_window(),
            default_bucket: default_bucket(),
            timeout_secs: default_query_timeout_secs(),
        }
    }
}

impl QueryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Capacity of the ingest -> evaluator queue. Ingestion waits when full.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Capacity of the evaluator -> sink queue.
    #[serde(default = "default_queue_capacity")]
    pub sink_queue_capacity: usize,
    #[serde(default = "default_sink_timeout_secs")]
    pub sink_timeout_secs: u64,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_rules")]
    pub rules: Vec<RuleConfig>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            sink_queue_capacity: default_queue_capacity(),
            sink_timeout_secs: default_sink_timeout_secs(),
            webhook_url: None,
            rules: default_rules(),
        }
    }
}

impl AlertConfig {
    pub fn sink_timeout(&self) -> Duration {
        Duration::from_secs(self.sink_timeout_secs)
    }
}

/// One `[[alert.rules]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    pub id: String,
    pub metric: String,
    #[serde(default = "default_resource_pattern")]
    pub resource_pattern: String,
    pub operator: String,
    pub threshold: f64,
}

fn default_http_port() -> u16 {
    5000
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_window() -> Duration {
    Duration::from_secs(3 * 3600)
}

fn default_bucket() -> Duration {
    Duration::from_secs(60)
}

fn default_query_timeout_secs() -> u64 {
    10
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_sink_timeout_secs() -> u64 {
    5
}

fn default_resource_pattern() -> String {
    "*".to_string()
}

fn default_rules() -> Vec<RuleConfig> {
    vec![RuleConfig {
        id: "cpu-user-high".to_string(),
        metric: "cpu.user".to_string(),
        resource_pattern: default_resource_pattern(),
        operator: "gt".to_string(),
        threshold: 15.0,
    }]
}

impl ServerConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Like [`ServerConfig::load`], but a missing file yields the defaults.
    /// A file that exists and fails to parse is still an error.
    pub fn load_or_default(path: &str) -> anyhow::Result<Self> {
        if !Path::new(path).exists() {
            tracing::warn!(path, "Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }
}
