//! Configuration module for the Infra Validator
//!
//! Two sources feed a validation run:
//!
//! 1. **Process settings** (`ValidatorSettings`): polling cadence, timeouts,
//!    staging directory and cluster identity, read from the environment after
//!    an optional `.env` file.
//! 2. **Run configuration** (`RunConfigDto`): the serving, validation and
//!    request specs plus input and output paths, read from a JSON file.
//!
//! Both are loaded once at startup and fail fast on invalid values.
//!
//! # Usage
//!
//! ```ignore
//! use infra_validator_shared::config::ConfigLoader;
//! use std::path::PathBuf;
//!
//! let loader = ConfigLoader::new(Some(PathBuf::from(".env")));
//! let settings = loader.load_settings()?;
//! let run = loader.load_run_config("run.json".as_ref())?;
//! ```
//!
//! # Environment Variables
//!
//! All optional:
//!
//! - `INFRA_VALIDATOR_POLL_INTERVAL_MS`: readiness poll interval (default: 1000)
//! - `INFRA_VALIDATOR_PROBE_TIMEOUT_SECS`: per-request timeout (default: 10)
//! - `INFRA_VALIDATOR_TEARDOWN_RETRIES`: extra teardown tries (default: 3)
//! - `INFRA_VALIDATOR_STAGING_DIR`: where copied models are staged
//! - `INFRA_VALIDATOR_POD_NAME`: the validator's own pod (Kubernetes only)
//! - `INFRA_VALIDATOR_NAMESPACE`: the validator's namespace (Kubernetes only)
//! - `RUST_LOG`: log filter (default: "info")

pub mod dto;
pub mod error;
pub mod loader;
pub mod validator;

pub use dto::{ClusterIdentity, RunConfigDto, ValidatorSettings};
pub use error::{ConfigError, Result};
pub use loader::ConfigLoader;
pub use validator::{validate_run_config, validate_settings};
