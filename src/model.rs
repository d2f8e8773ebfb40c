//! Model records and gateway wire types

use crate::error::{FleetError, FleetResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Inference engine backing a model instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Ollama,
    Vllm,
}

impl Engine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::Vllm => "vllm",
        }
    }
}

impl std::fmt::Display for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for Engine {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "vllm" => Ok(Self::Vllm),
            other => Err(FleetError::validation(format!("unknown engine '{}'", other))),
        }
    }
}

/// Functional category of a model; decides request/response shape for tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageType {
    Generation,
    Embedding,
}

impl UsageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generation => "generation",
            Self::Embedding => "embedding",
        }
    }
}

impl std::fmt::Display for UsageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for UsageType {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "generation" => Ok(Self::Generation),
            "embedding" => Ok(Self::Embedding),
            other => Err(FleetError::validation(format!(
                "unknown usage type '{}'",
                other
            ))),
        }
    }
}

/// Lifecycle status reported by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    Starting,
    Running,
    Stopped,
    Error,
}

impl ModelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for ModelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for ModelStatus {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "starting" => Ok(Self::Starting),
            "running" => Ok(Self::Running),
            "stopped" => Ok(Self::Stopped),
            "error" => Ok(Self::Error),
            other => Err(FleetError::validation(format!("unknown status '{}'", other))),
        }
    }
}

/// A model instance as last reported by the gateway
///
/// The client never constructs these on its own; they only come out of a
/// gateway response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    pub id: String,
    pub name: String,
    pub engine: Engine,
    pub usage_type: UsageType,
    pub status: ModelStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub container_id: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    /// Comma-separated device list, e.g. "0,1"
    #[serde(default)]
    pub gpu_id: Option<String>,
}

impl Model {
    /// Running models are expected to have a backing container; a missing one is
    /// tolerated and only reported.
    pub fn is_reconciled(&self) -> bool {
        self.status != ModelStatus::Running || self.container_id.is_some()
    }
}

/// Frequently refreshed projection of a model's backing container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerInfo {
    #[serde(default)]
    pub container_id: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub gpu_id: Option<String>,
    pub engine: Engine,
}

/// Engine-specific knobs forwarded with a start request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StartParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub huggingface_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

/// Request body for starting a new model instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartConfig {
    pub engine: Engine,
    pub name: String,
    pub usage_type: UsageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<StartParameters>,
}

impl StartConfig {
    pub fn new(name: impl Into<String>, engine: Engine, usage_type: UsageType) -> Self {
        Self {
            engine,
            name: name.into(),
            usage_type,
            gpu_id: None,
            parameters: None,
        }
    }

    /// Validate operator input before it reaches the gateway
    pub fn validate(&self) -> FleetResult<()> {
        if self.name.trim().is_empty() {
            return Err(FleetError::validation("model name cannot be empty"));
        }
        if let Some(gpu_id) = &self.gpu_id {
            parse_gpu_list(gpu_id)?;
        }
        if let Some(temperature) = self.parameters.as_ref().and_then(|p| p.temperature)
            && !(0.0..=2.0).contains(&temperature)
        {
            return Err(FleetError::validation(format!(
                "temperature must be within [0, 2] (got {})",
                temperature
            )));
        }
        Ok(())
    }
}

/// Parse a comma-separated GPU device list such as "0,1,3"
pub fn parse_gpu_list(gpu_id: &str) -> FleetResult<Vec<u32>> {
    gpu_id
        .split(',')
        .map(|part| {
            let part = part.trim();
            part.parse::<u32>().map_err(|_| {
                FleetError::validation(format!("invalid GPU device '{}' in '{}'", part, gpu_id))
            })
        })
        .collect()
}

/// Envelope returned by mutating and test endpoints
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayResponse {
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

fn default_success() -> bool {
    true
}

impl GatewayResponse {
    /// Convert an envelope with `success: false` into an error
    pub fn into_result(self) -> FleetResult<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(FleetError::Rejected {
                message: self.failure_message(),
            })
        }
    }

    /// The most specific failure description the gateway provided
    pub fn failure_message(&self) -> String {
        self.error
            .clone()
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| self.message.clone())
    }
}

/// Log lines for a model's container
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogsResponse {
    #[serde(default)]
    pub logs: Vec<String>,
}
