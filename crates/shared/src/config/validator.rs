//! Configuration validation
//!
//! Checks that only involve the configuration itself. Spec invariants that
//! span the serving and validation specs are checked by the orchestrator.

use super::dto::{RunConfigDto, ValidatorSettings};
use super::error::{ConfigError, Result};

pub fn validate_settings(settings: &ValidatorSettings) -> Result<()> {
    if settings.poll_interval_ms == 0 {
        return Err(ConfigError::Validation(
            "poll interval must be greater than 0".to_string(),
        ));
    }
    if settings.probe_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "probe timeout must be greater than 0".to_string(),
        ));
    }
    if settings.staging_dir.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "staging directory cannot be empty".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_run_config(config: &RunConfigDto) -> Result<()> {
    if config.model_path.as_os_str().is_empty() {
        return Err(ConfigError::Validation("model_path cannot be empty".to_string()));
    }
    if config.blessing_dir.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "blessing_dir cannot be empty".to_string(),
        ));
    }
    if config.blessing_dir == config.model_path {
        return Err(ConfigError::Validation(
            "blessing_dir must differ from model_path".to_string(),
        ));
    }

    if let Some(request_spec) = &config.request_spec {
        if config.examples_path.is_none() {
            return Err(ConfigError::Validation(
                "request_spec needs examples_path".to_string(),
            ));
        }
        if request_spec.make_warmup && config.warmup_output_dir.is_none() {
            return Err(ConfigError::Validation(
                "make_warmup needs warmup_output_dir".to_string(),
            ));
        }
    }
    if matches!(&config.warmup_output_dir, Some(dir) if dir == &config.model_path) {
        return Err(ConfigError::Validation(
            "warmup_output_dir must differ from model_path".to_string(),
        ));
    }

    Ok(())
}
