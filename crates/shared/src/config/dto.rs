//! Configuration Data Transfer Objects (DTOs)
//!
//! Immutable values built once at startup and handed to the CLI, which maps
//! them onto the orchestrator and backends.

use infra_validator_domain::{RequestSpec, ServingSpec, ValidationSpec};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// Process settings
// ============================================================================

/// Process-level settings read from the environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorSettings {
    /// Readiness poll interval (milliseconds)
    pub poll_interval_ms: u64,

    /// Timeout for each probe request (seconds)
    pub probe_timeout_secs: u64,

    /// Extra teardown tries after the first one fails
    pub teardown_retries: u32,

    /// Delay between teardown tries (milliseconds)
    pub teardown_retry_delay_ms: u64,

    /// Root for staged model copies
    pub staging_dir: PathBuf,

    /// Where the validator itself runs, for Kubernetes
    pub cluster: ClusterIdentity,
}

impl Default for ValidatorSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            probe_timeout_secs: 10,
            teardown_retries: 3,
            teardown_retry_delay_ms: 1000,
            staging_dir: std::env::temp_dir().join("infra-validator"),
            cluster: ClusterIdentity::default(),
        }
    }
}

impl ValidatorSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn teardown_retry_delay(&self) -> Duration {
        Duration::from_millis(self.teardown_retry_delay_ms)
    }
}

/// Pod name and namespace of the validator, usually from the downward API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterIdentity {
    pub pod_name: Option<String>,
    pub namespace: Option<String>,
}

// ============================================================================
// Run configuration
// ============================================================================

/// One validation run, as written in the `--config` JSON file.
///
/// ```json
/// {
///   "serving_spec": {
///     "binary": { "tensorflow_serving": { "tags": ["2.15.0"] } },
///     "platform": { "local_docker": {} },
///     "model_name": "taxi"
///   },
///   "validation_spec": { "max_loading_time_seconds": 60, "num_tries": 3 },
///   "model_path": "/pipeline/Trainer/model/7",
///   "blessing_dir": "/pipeline/InfraValidator/blessing/8"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfigDto {
    pub serving_spec: ServingSpec,

    #[serde(default)]
    pub validation_spec: ValidationSpec,

    /// Absent means load-only validation.
    #[serde(default)]
    pub request_spec: Option<RequestSpec>,

    /// Exported model directory
    pub model_path: PathBuf,

    /// Directory of `Split-<name>` example directories
    #[serde(default)]
    pub examples_path: Option<PathBuf>,

    /// Where the blessing marker and `verdict.json` go
    pub blessing_dir: PathBuf,

    /// Where the warmup model is written when `make_warmup` is set
    #[serde(default)]
    pub warmup_output_dir: Option<PathBuf>,
}
