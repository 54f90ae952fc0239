use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
pub struct AgentConfig {
    /// Defaults to the host name.
    #[serde(default)]
    pub resource_id: Option<String>,
    #[serde(default = "default_server_url")]
    pub server_url: String,
    #[serde(default = "default_collection_interval")]
    pub collection_interval_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            resource_id: None,
            server_url: default_server_url(),
            collection_interval_secs: default_collection_interval(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_server_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_collection_interval() -> u64 {
    1
}

fn default_request_timeout() -> u64 {
    5
}

impl AgentConfig {
    pub fn load_or_default(path: &str) -> anyhow::Result<Self> {
        if !Path::new(path).exists() {
            tracing::warn!(path, "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Configured resource id, else the host name, else `"localhost"`.
    pub fn resolve_resource_id(&self) -> String {
        self.resource_id
            .clone()
            .filter(|id| !id.is_empty())
            .or_else(sysinfo::System::host_name)
            .unwrap_or_else(|| "localhost".to_string())
    }

    pub fn ingest_url(&self) -> String {
        format!("{}/v1/metrics", self.server_url.trim_end_matches('/'))
    }
}
