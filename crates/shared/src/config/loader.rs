//! Configuration loader
//!
//! Loads process settings from an optional .env file plus environment
//! variables, and the run configuration from its JSON file.

use std::path::{Path, PathBuf};

use super::dto::{ClusterIdentity, RunConfigDto, ValidatorSettings};
use super::error::{ConfigError, Result};
use super::validator::{validate_run_config, validate_settings};

pub const POLL_INTERVAL_VAR: &str = "INFRA_VALIDATOR_POLL_INTERVAL_MS";
pub const PROBE_TIMEOUT_VAR: &str = "INFRA_VALIDATOR_PROBE_TIMEOUT_SECS";
pub const TEARDOWN_RETRIES_VAR: &str = "INFRA_VALIDATOR_TEARDOWN_RETRIES";
pub const TEARDOWN_RETRY_DELAY_VAR: &str = "INFRA_VALIDATOR_TEARDOWN_RETRY_DELAY_MS";
pub const STAGING_DIR_VAR: &str = "INFRA_VALIDATOR_STAGING_DIR";
pub const POD_NAME_VAR: &str = "INFRA_VALIDATOR_POD_NAME";
pub const NAMESPACE_VAR: &str = "INFRA_VALIDATOR_NAMESPACE";

/// Configuration loader
///
/// # Example
///
/// ```ignore
/// let loader = ConfigLoader::new(Some(".env".into()));
/// let settings = loader.load_settings()?;
/// ```
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    env_file_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new(env_file_path: Option<PathBuf>) -> Self {
        Self { env_file_path }
    }

    /// Load process settings: the .env file first (if any), then the
    /// environment, then validation.
    pub fn load_settings(&self) -> Result<ValidatorSettings> {
        if let Some(path) = &self.env_file_path {
            self.load_env_file(path)?;
        }

        let settings = ValidatorSettings::from_env()?;
        validate_settings(&settings)?;
        Ok(settings)
    }

    /// Read and validate a run configuration file.
    pub fn load_run_config(&self, path: &Path) -> Result<RunConfigDto> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::RunConfigRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: RunConfigDto =
            serde_json::from_str(&content).map_err(|e| ConfigError::RunConfigParse {
                path: path.to_path_buf(),
                source: e,
            })?;

        validate_run_config(&config)?;
        Ok(config)
    }

    fn load_env_file(&self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Err(ConfigError::EnvFileLoad {
                path: path.to_path_buf(),
                source: dotenv::Error::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("File not found: {}", path.display()),
                )),
            });
        }

        dotenv::from_path(path).map_err(|e| ConfigError::EnvFileLoad {
            path: path.to_path_buf(),
            source: e,
        })?;

        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ValidatorSettings {
    /// Build settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build settings from any variable lookup. Unset variables take their
    /// defaults; set but unparseable ones are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        Ok(Self {
            poll_interval_ms: parse_optional_var(
                &lookup,
                POLL_INTERVAL_VAR,
                defaults.poll_interval_ms,
            )?,
            probe_timeout_secs: parse_optional_var(
                &lookup,
                PROBE_TIMEOUT_VAR,
                defaults.probe_timeout_secs,
            )?,
            teardown_retries: parse_optional_var(
                &lookup,
                TEARDOWN_RETRIES_VAR,
                defaults.teardown_retries,
            )?,
            teardown_retry_delay_ms: parse_optional_var(
                &lookup,
                TEARDOWN_RETRY_DELAY_VAR,
                defaults.teardown_retry_delay_ms,
            )?,
            staging_dir: non_empty(&lookup, STAGING_DIR_VAR)
                .map(PathBuf::from)
                .unwrap_or(defaults.staging_dir),
            cluster: ClusterIdentity {
                pod_name: non_empty(&lookup, POD_NAME_VAR),
                namespace: non_empty(&lookup, NAMESPACE_VAR),
            },
        })
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn non_empty<F>(lookup: &F, var: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(var)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Parse optional variable with default value
fn parse_optional_var<F, T>(lookup: &F, var: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match non_empty(lookup, var) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
            var: var.to_string(),
            value,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| vars.get(var).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let settings = ValidatorSettings::from_lookup(lookup(&[])).unwrap();
        assert_eq!(settings, ValidatorSettings::default());
        assert_eq!(settings.poll_interval_ms, 1000);
        assert_eq!(settings.probe_timeout_secs, 10);
        assert_eq!(settings.teardown_retries, 3);
    }

    #[test]
    fn test_overrides_from_environment() {
        let settings = ValidatorSettings::from_lookup(lookup(&[
            (POLL_INTERVAL_VAR, "250"),
            (PROBE_TIMEOUT_VAR, "30"),
            (TEARDOWN_RETRIES_VAR, "0"),
            (STAGING_DIR_VAR, "/data/staging"),
            (POD_NAME_VAR, "validator-abc"),
            (NAMESPACE_VAR, " ml "),
        ]))
        .unwrap();

        assert_eq!(settings.poll_interval().as_millis(), 250);
        assert_eq!(settings.probe_timeout().as_secs(), 30);
        assert_eq!(settings.teardown_retries, 0);
        assert_eq!(settings.staging_dir, PathBuf::from("/data/staging"));
        assert_eq!(settings.cluster.pod_name.as_deref(), Some("validator-abc"));
        assert_eq!(settings.cluster.namespace.as_deref(), Some("ml"));
    }

    #[test]
    fn test_unparseable_value_is_error() {
        let err =
            ValidatorSettings::from_lookup(lookup(&[(POLL_INTERVAL_VAR, "fast")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { var, .. } if var == POLL_INTERVAL_VAR));
    }

    #[test]
    fn test_missing_env_file() {
        let loader = ConfigLoader::new(Some(PathBuf::from("/nonexistent/.env")));
        let err = loader.load_settings().unwrap_err();
        assert!(matches!(err, ConfigError::EnvFileLoad { .. }));
    }

    #[test]
    fn test_load_run_config() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "serving_spec": {{
                    "binary": {{ "tensorflow_serving": {{ "tags": ["2.15.0"] }} }},
                    "platform": {{ "local_docker": {{}} }},
                    "model_name": "taxi"
                }},
                "validation_spec": {{ "max_loading_time_seconds": 60, "num_tries": 3 }},
                "request_spec": {{
                    "kind": {{ "tensorflow_serving": {{ "signature_names": ["serving_default"] }} }},
                    "num_examples": 2
                }},
                "model_path": "/models/taxi",
                "examples_path": "/data/examples",
                "blessing_dir": "/out/blessing"
            }}"#
        )
        .unwrap();

        let config = ConfigLoader::default().load_run_config(file.path()).unwrap();

        assert_eq!(config.serving_spec.model_name(), "taxi");
        assert_eq!(config.validation_spec.num_tries, 3);
        assert_eq!(config.request_spec.unwrap().num_examples, 2);
        assert_eq!(config.examples_path, Some(PathBuf::from("/data/examples")));
        assert_eq!(config.warmup_output_dir, None);
    }

    #[test]
    fn test_malformed_run_config() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("run.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = ConfigLoader::default().load_run_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::RunConfigParse { .. }));

        let err = ConfigLoader::default()
            .load_run_config(&tmp.path().join("missing.json"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::RunConfigRead { .. }));
    }
}
