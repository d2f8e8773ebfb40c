//! HTTP implementation of the model gateway

use super::ModelGateway;
use crate::config::ClientConfig;
use crate::error::{FleetError, FleetResult};
use crate::model::{ContainerInfo, GatewayResponse, LogsResponse, Model, StartConfig};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Gateway client over the dashboard REST API
///
/// Every request carries the configured overall timeout; an expired request is
/// reported as [`FleetError::Timeout`] for that target only.
#[derive(Clone, Debug)]
pub struct HttpGateway {
    client: Client,
    base_url: String,
    api_token: Option<String>,
    timeout: Duration,
}

impl HttpGateway {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> FleetResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FleetError::gateway(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token: None,
            timeout,
        })
    }

    pub fn from_config(config: &ClientConfig) -> FleetResult<Self> {
        let gateway = Self::new(config.gateway_url.clone(), config.request_timeout())?;
        Ok(match &config.api_token {
            Some(token) => gateway.with_token(token.clone()),
            None => gateway,
        })
    }

    /// Attach a bearer token identifying the logged-in operator
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn model_url(&self, id: &str, suffix: &str) -> String {
        format!(
            "{}/models/{}{}",
            self.base_url,
            urlencoding::encode(id),
            suffix
        )
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, id: Option<&str>) -> FleetResult<Response> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::NOT_FOUND
            && let Some(id) = id
        {
            return Err(FleetError::NotFound { id: id.to_string() });
        }

        // Prefer the gateway's own message when it sends an envelope
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<GatewayResponse>(&body)
            .ok()
            .and_then(|r| r.error.or(Some(r.message)))
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| format!("HTTP {}", status));

        Err(FleetError::gateway(message))
    }

    async fn json<T: DeserializeOwned>(&self, response: Response) -> FleetResult<T> {
        response.json::<T>().await.map_err(|e| {
            if e.is_timeout() {
                self.timeout_error()
            } else {
                FleetError::decode(e.to_string())
            }
        })
    }

    /// Mutating endpoints answer with an envelope that may still report failure
    async fn command(&self, request: RequestBuilder, id: Option<&str>) -> FleetResult<()> {
        let response = self.send(request, id).await?;
        let body = response.bytes().await.map_err(|e| self.map_transport_error(e))?;

        if body.is_empty() {
            return Ok(());
        }
        match serde_json::from_slice::<GatewayResponse>(&body) {
            Ok(envelope) => envelope.into_result().map(|_| ()),
            // Non-envelope bodies on a 2xx are treated as accepted
            Err(_) => Ok(()),
        }
    }

    fn map_transport_error(&self, err: reqwest::Error) -> FleetError {
        if err.is_timeout() {
            self.timeout_error()
        } else {
            FleetError::from(err)
        }
    }

    fn timeout_error(&self) -> FleetError {
        FleetError::Timeout {
            secs: self.timeout.as_secs(),
        }
    }
}

/// The listing endpoint returns a bare array; older gateways wrap it
fn decode_models(body: serde_json::Value) -> FleetResult<Vec<Model>> {
    if body.is_array() {
        return Ok(serde_json::from_value(body)?);
    }

    let envelope: GatewayResponse = serde_json::from_value(body)?;
    let envelope = envelope.into_result()?;
    let models = envelope
        .data
        .and_then(|mut data| data.get_mut("models").map(serde_json::Value::take))
        .ok_or_else(|| FleetError::decode("response has no model list"))?;

    Ok(serde_json::from_value(models)?)
}

#[async_trait]
impl ModelGateway for HttpGateway {
    async fn list_models(&self) -> FleetResult<Vec<Model>> {
        let url = format!("{}/models", self.base_url);
        let response = self.send(self.client.get(url), None).await?;
        let body: serde_json::Value = self.json(response).await?;
        decode_models(body)
    }

    async fn start_model(&self, config: &StartConfig) -> FleetResult<()> {
        let url = format!("{}/models/start", self.base_url);
        self.command(self.client.post(url).json(config), None).await
    }

    async fn stop_model(&self, id: &str) -> FleetResult<()> {
        let url = self.model_url(id, "/stop");
        self.command(self.client.post(url), Some(id)).await
    }

    async fn restart_model(&self, id: &str) -> FleetResult<()> {
        let url = self.model_url(id, "/restart");
        self.command(self.client.post(url), Some(id)).await
    }

    async fn remove_model(&self, id: &str) -> FleetResult<()> {
        let url = self.model_url(id, "");
        self.command(self.client.delete(url), Some(id)).await
    }

    async fn logs(&self, id: &str) -> FleetResult<Vec<String>> {
        let url = self.model_url(id, "/logs");
        let response = self.send(self.client.get(url), Some(id)).await?;
        let logs: LogsResponse = self.json(response).await?;
        Ok(logs.logs)
    }

    async fn container_info(&self, id: &str) -> FleetResult<ContainerInfo> {
        let url = self.model_url(id, "/container");
        let response = self.send(self.client.get(url), Some(id)).await?;
        self.json(response).await
    }

    async fn test_model(&self, id: &str, prompt: &str) -> FleetResult<serde_json::Value> {
        let url = self.model_url(id, "/test");
        let request = self
            .client
            .post(url)
            .json(&serde_json::json!({ "prompt": prompt }));
        let response = self.send(request, Some(id)).await?;
        let body: serde_json::Value = self.json(response).await?;

        if body.get("success").and_then(serde_json::Value::as_bool) == Some(false) {
            let envelope: GatewayResponse = serde_json::from_value(body)?;
            return Err(FleetError::Rejected {
                message: envelope.failure_message(),
            });
        }

        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_model_url_encodes_id() {
        let gateway = HttpGateway::new("http://localhost:8000/", Duration::from_secs(5)).unwrap();
        assert_eq!(gateway.base_url(), "http://localhost:8000");
        assert_eq!(
            gateway.model_url("a/b c", "/stop"),
            "http://localhost:8000/models/a%2Fb%20c/stop"
        );
    }

    #[test]
    fn test_decode_models_bare_array() {
        let body = json!([{
            "id": "1",
            "name": "llama3",
            "engine": "ollama",
            "usageType": "generation",
            "status": "running",
            "createdAt": "2024-05-01T10:00:00Z",
            "updatedAt": "2024-05-01T10:00:00Z"
        }]);
        let models = decode_models(body).unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].name, "llama3");
    }

    #[test]
    fn test_decode_models_envelope() {
        let body = json!({
            "success": true,
            "message": "ok",
            "data": { "models": [] }
        });
        assert!(decode_models(body).unwrap().is_empty());
    }

    #[test]
    fn test_decode_models_rejected_envelope() {
        let body = json!({ "success": false, "message": "docker unavailable" });
        let err = decode_models(body).unwrap_err();
        assert!(matches!(err, FleetError::Rejected { .. }));
    }
}
