//! Startup wiring
//!
//! Turns loaded configuration into the orchestrator's inputs and connects
//! the backend for the requested platform.

use infra_validator_application::{ValidationRequest, ValidatorOptions};
use infra_validator_domain::{
    BackendError, Blessing, ExampleSource, ModelArtifact, PlatformConfig, RuntimeBackend,
    Verdict, VersionVerdict,
};
use infra_validator_infrastructure::{
    DockerBackend, FileExampleSource, KubernetesBackend, KubernetesIdentityConfig,
};
use infra_validator_shared::{RunConfigDto, ValidatorSettings};
use std::sync::Arc;
use tracing::{info, warn};

pub fn validator_options(settings: &ValidatorSettings, run: &RunConfigDto) -> ValidatorOptions {
    ValidatorOptions {
        poll_interval: settings.poll_interval(),
        probe_timeout: settings.probe_timeout(),
        teardown_retries: settings.teardown_retries,
        teardown_retry_delay: settings.teardown_retry_delay(),
        staging_dir: settings.staging_dir.clone(),
        warmup_output_dir: run.warmup_output_dir.clone(),
    }
}

pub fn validation_request(run: &RunConfigDto) -> ValidationRequest {
    let examples = run.examples_path.as_ref().map(|path| {
        Arc::new(FileExampleSource::new(path.clone())) as Arc<dyn ExampleSource>
    });

    ValidationRequest {
        serving_spec: run.serving_spec.clone(),
        validation_spec: run.validation_spec.clone(),
        request_spec: run.request_spec.clone(),
        examples,
        model: ModelArtifact::new(run.model_path.clone()),
    }
}

/// Connect the runtime backend the serving spec asks for.
pub async fn connect_backend(
    platform: &PlatformConfig,
    settings: &ValidatorSettings,
) -> Result<Arc<dyn RuntimeBackend>, BackendError> {
    match platform {
        PlatformConfig::LocalDocker(config) => {
            let backend = DockerBackend::with_config(config.clone()).await?;
            info!("Using local Docker backend");
            Ok(Arc::new(backend))
        }
        PlatformConfig::Kubernetes(config) => {
            let identity = KubernetesIdentityConfig {
                pod_name: settings.cluster.pod_name.clone(),
                namespace: settings.cluster.namespace.clone(),
            };
            let backend = KubernetesBackend::new(config.clone(), identity).await?;
            info!("Using Kubernetes backend");
            Ok(Arc::new(backend))
        }
    }
}

/// Verdict for a run whose backend could not be reached: every version is
/// not blessed with no attempt made. Configuration errors yield `None` and
/// stay fatal.
pub fn unreachable_backend_verdict(run: &RunConfigDto, error: &BackendError) -> Option<Verdict> {
    if error.is_configuration_error() {
        return None;
    }

    warn!("Runtime backend unreachable, model is not blessed: {}", error);
    let versions = run
        .serving_spec
        .versions()
        .into_iter()
        .map(|version| VersionVerdict {
            version,
            blessing: Blessing::NotBlessed,
            attempts: 0,
            last_failure: Some(error.to_string()),
        })
        .collect();
    Some(Verdict::from_versions(run.model_path.clone(), versions))
}
