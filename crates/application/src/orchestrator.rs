//! Infra Validator Orchestrator
//!
//! Validates the inputs, resolves the model layout and builds the requests
//! once, then validates every binary version concurrently with sequential
//! retries inside each version.

use futures::future::join_all;
use infra_validator_domain::{
    AttemptId, BinaryVersion, Blessing, DomainError, ExampleSource, ModelArtifact, ModelLayout,
    PlatformConfig, PlatformKind, ProbeRequest, RequestSpec, Result, RuntimeBackend,
    ServingClient, ServingSpec, ValidationRunId, ValidationSpec, Verdict, VersionVerdict,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::layout_resolver::ServingLayoutResolver;
use crate::request_builder::{BuiltRequests, RequestBuilder};
use crate::state_machine::{AttemptSettings, ValidationAttempt};
use crate::warmup::WarmupWriter;

/// Process-level knobs, set per deployment rather than per run.
#[derive(Debug, Clone)]
pub struct ValidatorOptions {
    pub poll_interval: Duration,
    pub probe_timeout: Duration,
    pub teardown_retries: u32,
    pub teardown_retry_delay: Duration,
    /// Staged model copies go under `<staging_dir>/<run>/`.
    pub staging_dir: PathBuf,
    /// Where the warmup model is written; required with `make_warmup`.
    pub warmup_output_dir: Option<PathBuf>,
}

impl Default for ValidatorOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            probe_timeout: Duration::from_secs(10),
            teardown_retries: 3,
            teardown_retry_delay: Duration::from_secs(1),
            staging_dir: std::env::temp_dir().join("infra-validator"),
            warmup_output_dir: None,
        }
    }
}

/// Everything one validation run needs.
pub struct ValidationRequest {
    pub serving_spec: ServingSpec,
    pub validation_spec: ValidationSpec,
    pub request_spec: Option<RequestSpec>,
    pub examples: Option<Arc<dyn ExampleSource>>,
    pub model: ModelArtifact,
}

/// Checks every input that can be decided without launching anything.
pub fn check_request(request: &ValidationRequest, options: &ValidatorOptions) -> Result<()> {
    request.serving_spec.validate(&request.validation_spec)?;

    if let Some(spec) = &request.request_spec {
        spec.validate()?;
        if request.examples.is_none() {
            return Err(DomainError::InvalidRequestSpec {
                message: "a request spec needs an examples source".to_string(),
            });
        }
        if spec.make_warmup && options.warmup_output_dir.is_none() {
            return Err(DomainError::InvalidRequestSpec {
                message: "make_warmup needs a warmup output directory".to_string(),
            });
        }
    }

    if options.poll_interval.is_zero() || options.probe_timeout.is_zero() {
        return Err(DomainError::InvalidValidationSpec {
            message: "poll interval and probe timeout must be positive".to_string(),
        });
    }
    Ok(())
}

pub struct InfraValidator {
    backend: Arc<dyn RuntimeBackend>,
    client: Arc<dyn ServingClient>,
    options: ValidatorOptions,
}

impl InfraValidator {
    pub fn new(
        backend: Arc<dyn RuntimeBackend>,
        client: Arc<dyn ServingClient>,
        options: ValidatorOptions,
    ) -> Self {
        Self {
            backend,
            client,
            options,
        }
    }

    /// Input checks plus the backend matching the requested platform.
    pub fn check(&self, request: &ValidationRequest) -> Result<()> {
        check_request(request, &self.options)?;

        let expected = match &request.serving_spec.platform {
            PlatformConfig::LocalDocker(_) => PlatformKind::LocalDocker,
            PlatformConfig::Kubernetes(_) => PlatformKind::Kubernetes,
        };
        if self.backend.platform() != expected {
            return Err(DomainError::InvalidPlatformConfig {
                message: format!(
                    "serving spec targets {} but the backend is {}",
                    expected,
                    self.backend.platform()
                ),
            });
        }
        Ok(())
    }

    /// Run the whole validation. Returns `Err` only for configuration
    /// errors; every infrastructure fault ends up in the verdict.
    pub async fn validate(
        &self,
        request: ValidationRequest,
        cancel: CancellationToken,
    ) -> Result<Verdict> {
        self.check(&request)?;

        let run_id = ValidationRunId::new();
        let model_name = request.serving_spec.model_name().to_string();
        info!(
            "Starting infra validation {} of {} on {}",
            run_id,
            request.model.uri.display(),
            self.backend.platform()
        );

        let resolver =
            ServingLayoutResolver::new(self.options.staging_dir.join(run_id.short()));
        let layout = Arc::new(resolver.resolve(&request.model, &model_name)?);

        let built = match (&request.request_spec, &request.examples) {
            (Some(spec), Some(examples)) => {
                RequestBuilder::build(examples.as_ref(), spec, &model_name)?
            }
            _ => {
                info!("No request spec given, validating model loading only");
                BuiltRequests::default()
            }
        };
        let probes: Arc<[ProbeRequest]> = built.probes.into();

        let settings = AttemptSettings {
            max_loading_time: request.validation_spec.max_loading_time(),
            poll_interval: self.options.poll_interval,
            probe_timeout: self.options.probe_timeout,
            teardown_retries: self.options.teardown_retries,
            teardown_retry_delay: self.options.teardown_retry_delay,
        };

        // A configuration error in one version stops the others.
        let run_cancel = cancel.child_token();
        let num_tries = request.validation_spec.num_tries;
        let versions = request.serving_spec.versions();
        let results = join_all(versions.into_iter().enumerate().map(|(index, version)| {
            let layout = Arc::clone(&layout);
            let probes = Arc::clone(&probes);
            let settings = &settings;
            let run_cancel = run_cancel.clone();
            let run_id = run_id.clone();
            async move {
                let result = self
                    .validate_version(
                        run_id,
                        index,
                        version,
                        &layout,
                        &probes,
                        settings,
                        num_tries,
                        run_cancel.clone(),
                    )
                    .await;
                if result.is_err() {
                    run_cancel.cancel();
                }
                result
            }
        }))
        .await;

        let versions = results.into_iter().collect::<Result<Vec<_>>>()?;
        let mut verdict = Verdict::from_versions(layout.version_dir(), versions);

        if verdict.is_blessed() {
            if let (Some(warmup), Some(output_dir)) =
                (built.warmup.as_deref(), &self.options.warmup_output_dir)
            {
                match WarmupWriter::write(&layout, warmup, output_dir) {
                    Ok(model) => {
                        verdict.model = model;
                        verdict.has_warmup = true;
                    }
                    Err(e) => error!(
                        "Failed to write the warmup model, blessing {} without it: {}",
                        layout.version_dir().display(),
                        e
                    ),
                }
            }
        }

        info!(
            "Infra validation {} finished: {} ({})",
            run_id,
            verdict.blessing,
            verdict.model.display()
        );
        Ok(verdict)
    }

    /// Sequential attempts for one version, stopping at the first pass.
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip_all, fields(version = %version))]
    async fn validate_version(
        &self,
        run_id: ValidationRunId,
        index: usize,
        version: BinaryVersion,
        layout: &ModelLayout,
        probes: &[ProbeRequest],
        settings: &AttemptSettings,
        num_tries: u32,
        cancel: CancellationToken,
    ) -> Result<VersionVerdict> {
        let mut attempts = 0;
        let mut last_failure = None;

        for attempt in 1..=num_tries {
            if cancel.is_cancelled() {
                warn!("Run cancelled, not retrying {}", version);
                last_failure.get_or_insert_with(|| "cancelled".to_string());
                break;
            }

            attempts = attempt;
            let attempt_id = AttemptId::new(run_id.clone(), index, attempt);
            info!("Attempt {}/{} for {}", attempt, num_tries, version);

            let report = ValidationAttempt::new(
                self.backend.as_ref(),
                self.client.as_ref(),
                settings,
                cancel.clone(),
            )
            .run(attempt_id, &version, layout, probes)
            .await
            .inspect_err(|e| error!("Fatal error validating {}: {}", version, e))?;

            if report.passed() {
                return Ok(VersionVerdict {
                    version,
                    blessing: Blessing::Blessed,
                    attempts,
                    last_failure: None,
                });
            }
            last_failure = Some(report.outcome.to_string());
            if report.cancelled() {
                break;
            }
        }

        warn!("{} not blessed after {} attempt(s)", version, attempts);
        Ok(VersionVerdict {
            version,
            blessing: Blessing::NotBlessed,
            attempts,
            last_failure,
        })
    }
}
