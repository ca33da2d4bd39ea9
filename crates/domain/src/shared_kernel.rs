// Shared Kernel - Tipos base y errores compartidos

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Identificador único de una ejecución de validación
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidationRunId(pub Uuid);

impl ValidationRunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First eight hex characters, used in container and pod names.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for ValidationRunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ValidationRunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identificador de un intento dentro de una versión
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttemptId {
    pub run_id: ValidationRunId,
    pub version_index: usize,
    pub attempt: u32,
}

impl AttemptId {
    pub fn new(run_id: ValidationRunId, version_index: usize, attempt: u32) -> Self {
        Self {
            run_id,
            version_index,
            attempt,
        }
    }

    /// Instance name unique per (run, version, attempt) so consecutive
    /// attempts never collide on container or pod names.
    pub fn instance_name(&self) -> String {
        format!(
            "infra-validator-{}-v{}-a{}",
            self.run_id.short(),
            self.version_index,
            self.attempt
        )
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/v{}/a{}",
            self.run_id, self.version_index, self.attempt
        )
    }
}

/// Errores del dominio
#[derive(thiserror::Error, Debug)]
pub enum DomainError {
    #[error("Invalid serving spec: {message}")]
    InvalidServingSpec { message: String },

    #[error("Invalid validation spec: {message}")]
    InvalidValidationSpec { message: String },

    #[error("Invalid request spec: {message}")]
    InvalidRequestSpec { message: String },

    #[error("Invalid platform configuration: {message}")]
    InvalidPlatformConfig { message: String },

    #[error("Split not found: {split} (available: {available:?})")]
    SplitNotFound {
        split: String,
        available: Vec<String>,
    },

    #[error("No examples available in split {split}")]
    NoExamples { split: String },

    #[error("Environment variable {name} sets both a value and a secret reference")]
    ConflictingEnvVarSource { name: String },

    #[error("Examples source error: {message}")]
    ExamplesSource { message: String },

    #[error("Model layout error: {message}")]
    ModelLayout { message: String },

    #[error("Warmup error: {message}")]
    Warmup { message: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Infrastructure error: {message}")]
    InfrastructureError { message: String },
}

impl DomainError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Errors caused by the input rather than the environment. These are
    /// fatal and bypass the retry loop.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            DomainError::InvalidServingSpec { .. }
                | DomainError::InvalidValidationSpec { .. }
                | DomainError::InvalidRequestSpec { .. }
                | DomainError::InvalidPlatformConfig { .. }
                | DomainError::SplitNotFound { .. }
                | DomainError::NoExamples { .. }
                | DomainError::ConflictingEnvVarSource { .. }
                | DomainError::ExamplesSource { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, DomainError>;
