//! Configuration structures and loading logic

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Client configuration for talking to the model gateway
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    pub gateway_url: String,
    pub request_timeout_secs: u64,
    pub container_poll_interval_ms: u64,
    pub registry_poll_interval_ms: u64,

    /// Seconds a model may spend in `starting` before it is shown as stalled
    pub startup_timeout_secs: u64,

    /// Embedding values shown before the operator expands a result
    pub embedding_preview_len: usize,
    pub page_size: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            gateway_url: default_gateway_url(),
            request_timeout_secs: default_request_timeout(),
            container_poll_interval_ms: default_container_poll_interval(),
            registry_poll_interval_ms: default_registry_poll_interval(),
            startup_timeout_secs: default_startup_timeout(),
            embedding_preview_len: default_embedding_preview_len(),
            page_size: default_page_size(),
            api_token: None,
        }
    }
}

impl ClientConfig {
    /// Load configuration from file with environment variable overrides
    ///
    /// Without an explicit path the per-user config file is used when present.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let path = path.or_else(|| default_config_path().filter(|p| p.exists()));

        let mut config = if let Some(path) = path {
            Self::from_file(&path)?
        } else {
            Self::default()
        };

        // Environment variable overrides
        if let Ok(url) = std::env::var("FLEET_GATEWAY_URL") {
            config.gateway_url = url;
        }
        if let Ok(timeout) = std::env::var("FLEET_REQUEST_TIMEOUT") {
            config.request_timeout_secs = timeout
                .parse()
                .context("Invalid FLEET_REQUEST_TIMEOUT value")?;
        }
        if let Ok(token) = std::env::var("FLEET_API_TOKEN") {
            config.api_token = Some(token).filter(|t| !t.is_empty());
        }

        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).context("Failed to parse TOML config")
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !(self.gateway_url.starts_with("http://") || self.gateway_url.starts_with("https://"))
        {
            anyhow::bail!(
                "Gateway URL must start with http:// or https:// (got '{}')",
                self.gateway_url
            );
        }
        if self.request_timeout_secs == 0 {
            anyhow::bail!("Request timeout must be greater than zero");
        }
        if self.container_poll_interval_ms == 0 || self.registry_poll_interval_ms == 0 {
            anyhow::bail!("Poll intervals must be greater than zero");
        }
        if self.page_size == 0 {
            anyhow::bail!("Page size must be greater than zero");
        }
        if self.embedding_preview_len == 0 {
            anyhow::bail!("Embedding preview length must be greater than zero");
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn container_poll_interval(&self) -> Duration {
        Duration::from_millis(self.container_poll_interval_ms)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn registry_poll_interval(&self) -> Duration {
        Duration::from_millis(self.registry_poll_interval_ms)
    }
}

/// `$XDG_CONFIG_HOME/model-fleet/config.toml` (or the platform equivalent)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("model-fleet").join("config.toml"))
}

// Default functions
fn default_gateway_url() -> String {
    "http://localhost:8000".to_string()
}
fn default_request_timeout() -> u64 {
    30
}
fn default_container_poll_interval() -> u64 {
    5000
}
fn default_registry_poll_interval() -> u64 {
    10000
}
fn default_startup_timeout() -> u64 {
    300
}
fn default_embedding_preview_len() -> usize {
    50
}
fn default_page_size() -> usize {
    20
}
