// ServingClient Trait - Cliente del endpoint de inferencia (opaco)

use crate::request_spec::ProbeRequest;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Model state as reported by the serving endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelState {
    /// Endpoint not answering yet.
    Unavailable,
    Loading,
    Available,
    /// The server gave up loading the model.
    Failed { reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Server returned HTTP {status}: {body}")]
    ErrorResponse { status: u16, body: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

#[async_trait]
pub trait ServingClient: Send + Sync {
    async fn model_state(&self, endpoint: &str, model_name: &str)
    -> Result<ModelState, ProbeError>;

    /// Send one inference request. Success means a well-formed, non-error
    /// response.
    async fn send(&self, endpoint: &str, request: &ProbeRequest) -> Result<(), ProbeError>;
}
