// RuntimeBackend Trait - Abstracción para lanzar servidores de modelos efímeros

use crate::model::ModelLayout;
use crate::serving_spec::BinaryVersion;
use crate::shared_kernel::{AttemptId, DomainError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Plataforma que creó la instancia
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlatformKind {
    LocalDocker,
    Kubernetes,
}

impl fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformKind::LocalDocker => write!(f, "local_docker"),
            PlatformKind::Kubernetes => write!(f, "kubernetes"),
        }
    }
}

/// Estado de salud del backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Degraded { reason: String },
    Unhealthy { reason: String },
    #[default]
    Unknown,
}

/// Observed state of a launched server instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceState {
    /// Still starting; keep polling.
    Loading,
    /// Running and able to receive traffic.
    Ready,
    /// Terminal runtime fault (exited, failed phase, vanished).
    Crashed { reason: String },
}

impl InstanceState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, InstanceState::Crashed { .. })
    }
}

/// Handle to a launched server instance. Owned by the attempt that launched
/// it, between launch and teardown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerHandle {
    pub attempt_id: AttemptId,
    /// Container name or pod name
    pub instance_name: String,
    /// Container id or pod uid
    pub resource_id: String,
    pub platform: PlatformKind,
    pub image: String,
    pub created_at: DateTime<Utc>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ServerHandle {
    pub fn new(
        attempt_id: AttemptId,
        instance_name: impl Into<String>,
        resource_id: impl Into<String>,
        platform: PlatformKind,
        image: impl Into<String>,
    ) -> Self {
        Self {
            attempt_id,
            instance_name: instance_name.into(),
            resource_id: resource_id.into(),
            platform,
            image: image.into(),
            created_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Errores específicos del backend
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Failed to pull image {image}: {message}")]
    ImagePullFailed { image: String, message: String },

    #[error("Launch failed: {0}")]
    LaunchFailed(String),

    #[error("Instance not found: {0}")]
    InstanceNotFound(String),

    #[error("Endpoint unavailable: {0}")]
    EndpointUnavailable(String),

    #[error("Operation timeout: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BackendError {
    /// Configuration errors are fatal; everything else counts as a failed
    /// attempt.
    pub fn is_configuration_error(&self) -> bool {
        matches!(self, BackendError::InvalidConfiguration(_))
    }
}

impl From<BackendError> for DomainError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::InvalidConfiguration(message) => {
                DomainError::InvalidPlatformConfig { message }
            }
            _ => DomainError::InfrastructureError {
                message: err.to_string(),
            },
        }
    }
}

impl From<DomainError> for BackendError {
    fn from(err: DomainError) -> Self {
        if err.is_configuration_error() {
            BackendError::InvalidConfiguration(err.to_string())
        } else {
            BackendError::Internal(err.to_string())
        }
    }
}

/// Trait principal para todos los backends de ejecución.
///
/// Implementaciones: DockerBackend, KubernetesBackend.
#[async_trait]
pub trait RuntimeBackend: Send + Sync {
    fn platform(&self) -> PlatformKind;

    /// Start a server for `version` serving the model at `layout`. A launch
    /// that fails part way must not leave resources behind.
    async fn launch(
        &self,
        attempt_id: &AttemptId,
        version: &BinaryVersion,
        layout: &ModelLayout,
    ) -> Result<ServerHandle, BackendError>;

    /// Non-blocking readiness poll.
    async fn poll(&self, handle: &ServerHandle) -> Result<InstanceState, BackendError>;

    /// Base URL of the serving endpoint, e.g. `http://127.0.0.1:32768`.
    async fn endpoint(&self, handle: &ServerHandle) -> Result<String, BackendError>;

    /// Destroy the instance. Idempotent: a missing instance is success.
    async fn teardown(&self, handle: &ServerHandle) -> Result<(), BackendError>;

    async fn health_check(&self) -> Result<HealthStatus, BackendError> {
        Ok(HealthStatus::Unknown)
    }
}
