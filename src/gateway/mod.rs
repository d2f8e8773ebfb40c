//! Remote model gateway contract
//!
//! The fleet core talks to the gateway only through [`ModelGateway`]. Transport
//! details live in the implementations; [`HttpGateway`] speaks the dashboard's
//! REST API.

pub mod http;

use crate::error::FleetResult;
use crate::model::{ContainerInfo, Model, StartConfig};
use async_trait::async_trait;

pub use http::HttpGateway;

/// Narrow request/response contract to the remote model gateway
///
/// Bulk variants are client-side fan-out over these single-id operations.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// List every model the gateway knows about
    async fn list_models(&self) -> FleetResult<Vec<Model>>;

    /// Submit a start request; the model shows up on a later listing
    async fn start_model(&self, config: &StartConfig) -> FleetResult<()>;

    async fn stop_model(&self, id: &str) -> FleetResult<()>;

    async fn restart_model(&self, id: &str) -> FleetResult<()>;

    async fn remove_model(&self, id: &str) -> FleetResult<()>;

    /// Container log lines, oldest first
    async fn logs(&self, id: &str) -> FleetResult<Vec<String>>;

    async fn container_info(&self, id: &str) -> FleetResult<ContainerInfo>;

    /// Send a test prompt and return the undecoded response body
    ///
    /// Decoding depends on the model's usage type and is done by the caller.
    async fn test_model(&self, id: &str, prompt: &str) -> FleetResult<serde_json::Value>;
}
