//! TensorFlow Serving REST client
//!
//! `GET /v1/models/<name>` reports model version status,
//! `POST /v1/models/<name>:<method>` runs inference.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use infra_validator_domain::{ModelState, ProbeError, ProbeRequest, ServingClient};

/// Response of the model status endpoint.
#[derive(Debug, Deserialize)]
struct ModelStatusResponse {
    #[serde(default)]
    model_version_status: Vec<ModelVersionStatus>,
}

#[derive(Debug, Deserialize)]
struct ModelVersionStatus {
    #[serde(default)]
    version: String,
    state: String,
    #[serde(default)]
    status: Option<StatusDetail>,
}

#[derive(Debug, Deserialize)]
struct StatusDetail {
    #[serde(default)]
    error_code: String,
    #[serde(default)]
    error_message: String,
}

impl ModelStatusResponse {
    /// Any available version makes the model available. A version that
    /// reached END with an error means the load failed for good.
    fn model_state(&self) -> ModelState {
        if self
            .model_version_status
            .iter()
            .any(|v| v.state == "AVAILABLE")
        {
            return ModelState::Available;
        }

        let failure = self.model_version_status.iter().find_map(|v| {
            let status = v.status.as_ref()?;
            let failed =
                v.state == "END" && !status.error_code.is_empty() && status.error_code != "OK";
            failed.then(|| {
                format!(
                    "version {} ended with {}: {}",
                    v.version, status.error_code, status.error_message
                )
            })
        });

        match failure {
            Some(reason) => ModelState::Failed { reason },
            None => ModelState::Loading,
        }
    }
}

/// REST client for TensorFlow Serving endpoints
#[derive(Debug, Clone)]
pub struct TensorflowServingClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl TensorflowServingClient {
    /// Every request is bounded by `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProbeError::Connection(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, timeout })
    }

    fn model_url(endpoint: &str, model_name: &str) -> String {
        format!("{}/v1/models/{}", endpoint.trim_end_matches('/'), model_name)
    }

    fn map_send_error(&self, e: reqwest::Error) -> ProbeError {
        if e.is_timeout() {
            ProbeError::Timeout(self.timeout)
        } else {
            ProbeError::Connection(format!("Request failed: {}", e))
        }
    }
}

#[async_trait]
impl ServingClient for TensorflowServingClient {
    async fn model_state(
        &self,
        endpoint: &str,
        model_name: &str,
    ) -> Result<ModelState, ProbeError> {
        let url = Self::model_url(endpoint, model_name);

        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) if e.is_connect() || e.is_timeout() => {
                debug!("Model status endpoint {} not reachable yet: {}", url, e);
                return Ok(ModelState::Unavailable);
            }
            Err(e) => return Err(self.map_send_error(e)),
        };

        // The server answers 404 until the model is registered.
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(ModelState::Loading);
        }

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProbeError::ErrorResponse { status, body });
        }

        let status: ModelStatusResponse = response.json().await.map_err(|e| {
            ProbeError::MalformedResponse(format!("Failed to parse model status: {}", e))
        })?;

        Ok(status.model_state())
    }

    async fn send(&self, endpoint: &str, request: &ProbeRequest) -> Result<(), ProbeError> {
        let url = format!("{}{}", endpoint.trim_end_matches('/'), request.path());

        let response = self
            .client
            .post(&url)
            .json(&request.body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProbeError::ErrorResponse { status, body });
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProbeError::MalformedResponse(format!("Invalid JSON: {}", e)))?;

        match body.as_object() {
            Some(object) if object.contains_key("error") => Err(ProbeError::MalformedResponse(
                format!("Server reported an error: {}", object["error"]),
            )),
            Some(_) => Ok(()),
            None => Err(ProbeError::MalformedResponse(format!(
                "Expected a JSON object, got {}",
                body
            ))),
        }
    }
}
