//! End-to-end validation runs against a scripted backend.

mod common;

use common::{FakeBackend, FakeServingClient, InMemoryExamples, Script, exported_model};
use infra_validator_application::{
    CancellationToken, InfraValidator, ValidationRequest, ValidatorOptions, WarmupWriter,
    check_request,
};
use infra_validator_domain::{
    Blessing, DomainError, KubernetesPlatformConfig, LocalDockerConfig, ModelArtifact,
    ModelVolume, PlatformConfig, PlatformKind, RequestSpec, ServingBinary, ServingSpec,
    TensorflowServingBinary, TensorflowServingRequestSpec, ValidationSpec,
};
use rstest::rstest;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tempfile::TempDir;

fn serving_spec(tags: &[&str]) -> ServingSpec {
    ServingSpec::new(
        ServingBinary::TensorflowServing(TensorflowServingBinary {
            tags: tags.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        }),
        PlatformConfig::LocalDocker(LocalDockerConfig::default()),
    )
    .with_model_name("taxi")
}

fn request(root: &Path, tags: &[&str], num_tries: u32) -> ValidationRequest {
    ValidationRequest {
        serving_spec: serving_spec(tags),
        validation_spec: ValidationSpec::new(60, num_tries),
        request_spec: None,
        examples: None,
        model: ModelArtifact::new(exported_model(root)),
    }
}

fn with_requests(mut request: ValidationRequest, spec: RequestSpec) -> ValidationRequest {
    request.request_spec = Some(spec);
    request.examples = Some(Arc::new(InMemoryExamples::with_split("eval", 10)));
    request
}

fn options(root: &Path) -> ValidatorOptions {
    ValidatorOptions {
        teardown_retry_delay: Duration::from_millis(10),
        staging_dir: root.join("staging"),
        ..Default::default()
    }
}

fn validator(
    backend: &Arc<FakeBackend>,
    client: &Arc<FakeServingClient>,
    options: ValidatorOptions,
) -> InfraValidator {
    InfraValidator::new(backend.clone(), client.clone(), options)
}

#[tokio::test(start_paused = true)]
async fn test_blessed_after_two_failures() {
    let tmp = TempDir::new().unwrap();
    let backend = Arc::new(FakeBackend::new().script(
        "1.15",
        &[Script::Crash, Script::RejectRequests, Script::Serve],
    ));
    let client = Arc::new(FakeServingClient::new());
    let request = with_requests(
        request(tmp.path(), &["1.15"], 3),
        RequestSpec::tensorflow_serving(Default::default()),
    );

    let verdict = validator(&backend, &client, options(tmp.path()))
        .validate(request, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(verdict.blessing, Blessing::Blessed);
    assert_eq!(verdict.versions[0].attempts, 3);
    assert_eq!(backend.launch_count(), 3);
    assert_eq!(backend.teardown_count(), 3);
    assert_eq!(backend.overlapping_launches.load(Ordering::SeqCst), 0);
}

#[rstest]
#[case(1)]
#[case(3)]
#[tokio::test(start_paused = true)]
async fn test_not_blessed_when_every_try_fails(#[case] num_tries: u32) {
    let tmp = TempDir::new().unwrap();
    let script = vec![Script::Hang; num_tries as usize];
    let backend = Arc::new(FakeBackend::new().script("1.15", &script));
    let client = Arc::new(FakeServingClient::new());

    let verdict = validator(&backend, &client, options(tmp.path()))
        .validate(request(tmp.path(), &["1.15"], num_tries), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(verdict.blessing, Blessing::NotBlessed);
    assert_eq!(verdict.versions[0].attempts, num_tries);
    assert!(
        verdict.versions[0]
            .last_failure
            .as_deref()
            .unwrap()
            .contains("load timeout")
    );
    assert_eq!(backend.launch_count(), num_tries as usize);
    assert_eq!(backend.teardown_count(), num_tries as usize);
}

#[tokio::test(start_paused = true)]
async fn test_one_failing_version_fails_the_run() {
    let tmp = TempDir::new().unwrap();
    let backend = Arc::new(
        FakeBackend::new().script("2.0", &[Script::LaunchFails, Script::LaunchFails]),
    );
    let client = Arc::new(FakeServingClient::new());

    let verdict = validator(&backend, &client, options(tmp.path()))
        .validate(request(tmp.path(), &["1.15", "2.0"], 2), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(verdict.blessing, Blessing::NotBlessed);
    assert_eq!(verdict.versions.len(), 2);
    assert_eq!(verdict.versions[0].blessing, Blessing::Blessed);
    assert_eq!(verdict.versions[0].attempts, 1);
    assert_eq!(verdict.versions[1].blessing, Blessing::NotBlessed);
    assert_eq!(verdict.versions[1].attempts, 2);
    // Failed launches leave nothing to tear down.
    assert_eq!(backend.launches_for(0), 1);
    assert_eq!(backend.launches_for(1), 0);
    assert_eq!(backend.teardown_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_requests_per_signature_and_example() {
    let tmp = TempDir::new().unwrap();
    let backend = Arc::new(FakeBackend::new());
    let client = Arc::new(FakeServingClient::new());
    let spec = RequestSpec::tensorflow_serving(TensorflowServingRequestSpec {
        signature_names: vec!["serving_default".to_string(), "classification".to_string()],
        ..Default::default()
    })
    .with_num_examples(3);

    let verdict = validator(&backend, &client, options(tmp.path()))
        .validate(
            with_requests(request(tmp.path(), &["1.15"], 1), spec),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(verdict.is_blessed());
    assert_eq!(client.sent_count(), 6);
}

#[tokio::test(start_paused = true)]
async fn test_load_only_without_request_spec() {
    let tmp = TempDir::new().unwrap();
    let backend = Arc::new(FakeBackend::new());
    let client = Arc::new(FakeServingClient::new());

    let verdict = validator(&backend, &client, options(tmp.path()))
        .validate(request(tmp.path(), &["1.15"], 1), CancellationToken::new())
        .await
        .unwrap();

    assert!(verdict.is_blessed());
    assert_eq!(client.sent_count(), 0);
    assert!(!verdict.has_warmup);
    // Blessed model is the staged serving layout itself.
    assert!(verdict.model.starts_with(tmp.path().join("staging")));
    assert!(verdict.model.ends_with("taxi/1"));
    assert!(verdict.model.join("saved_model.pb").is_file());
}

#[tokio::test(start_paused = true)]
async fn test_warmup_model_written_when_blessed() {
    let tmp = TempDir::new().unwrap();
    let backend = Arc::new(FakeBackend::new());
    let client = Arc::new(FakeServingClient::new());
    let mut options = options(tmp.path());
    options.warmup_output_dir = Some(tmp.path().join("warmup"));
    let spec = RequestSpec::tensorflow_serving(Default::default())
        .with_num_examples(2)
        .with_warmup(true);

    let verdict = validator(&backend, &client, options)
        .validate(
            with_requests(request(tmp.path(), &["1.15"], 1), spec),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(verdict.is_blessed());
    assert!(verdict.has_warmup);
    assert_eq!(verdict.model, tmp.path().join("warmup/taxi/1"));
    assert!(verdict.model.join("saved_model.pb").is_file());
    assert_eq!(WarmupWriter::read(&verdict.model).unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_no_warmup_when_not_blessed() {
    let tmp = TempDir::new().unwrap();
    let backend = Arc::new(FakeBackend::new().script("1.15", &[Script::RejectRequests]));
    let client = Arc::new(FakeServingClient::new());
    let mut options = options(tmp.path());
    options.warmup_output_dir = Some(tmp.path().join("warmup"));
    let spec = RequestSpec::tensorflow_serving(Default::default()).with_warmup(true);

    let verdict = validator(&backend, &client, options)
        .validate(
            with_requests(request(tmp.path(), &["1.15"], 1), spec),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(verdict.blessing, Blessing::NotBlessed);
    assert!(!verdict.has_warmup);
    assert!(!tmp.path().join("warmup").exists());
}

#[tokio::test(start_paused = true)]
async fn test_warmup_skipped_when_make_warmup_disabled() {
    let tmp = TempDir::new().unwrap();
    let backend = Arc::new(FakeBackend::new());
    let client = Arc::new(FakeServingClient::new());
    let mut options = options(tmp.path());
    options.warmup_output_dir = Some(tmp.path().join("warmup"));
    let spec = RequestSpec::tensorflow_serving(Default::default()).with_warmup(false);

    let verdict = validator(&backend, &client, options)
        .validate(
            with_requests(request(tmp.path(), &["1.15"], 1), spec),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(verdict.is_blessed());
    assert!(!verdict.has_warmup);
    assert!(verdict.model.starts_with(tmp.path().join("staging")));
    assert!(verdict.model.ends_with("taxi/1"));
    assert!(!tmp.path().join("warmup").exists());
}

#[tokio::test(start_paused = true)]
async fn test_warmup_write_failure_keeps_blessing() {
    let tmp = TempDir::new().unwrap();
    let backend = Arc::new(FakeBackend::new());
    let client = Arc::new(FakeServingClient::new());
    // A regular file where the warmup directory should go.
    let blocked = tmp.path().join("warmup");
    std::fs::write(&blocked, b"not a directory").unwrap();
    let mut options = options(tmp.path());
    options.warmup_output_dir = Some(blocked.clone());
    let spec = RequestSpec::tensorflow_serving(Default::default()).with_warmup(true);

    let verdict = validator(&backend, &client, options)
        .validate(
            with_requests(request(tmp.path(), &["1.15"], 1), spec),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(verdict.is_blessed());
    assert!(!verdict.has_warmup);
    assert!(verdict.model.starts_with(tmp.path().join("staging")));
    assert!(verdict.model.join("saved_model.pb").is_file());
    assert!(blocked.is_file());
}

#[tokio::test(start_paused = true)]
async fn test_kubernetes_without_model_volume_rejected() {
    let tmp = TempDir::new().unwrap();
    let backend = Arc::new(FakeBackend::new().on_platform(PlatformKind::Kubernetes));
    let client = Arc::new(FakeServingClient::new());
    let mut request = request(tmp.path(), &["1.15"], 1);
    request.serving_spec.platform = PlatformConfig::Kubernetes(KubernetesPlatformConfig {
        active_deadline_seconds: 120,
        model_volume: None,
        ..Default::default()
    });

    let err = validator(&backend, &client, options(tmp.path()))
        .validate(request, CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, DomainError::InvalidPlatformConfig { .. }));
    assert_eq!(backend.launch_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_kubernetes_deadline_rejected_before_launch() {
    let tmp = TempDir::new().unwrap();
    let backend = Arc::new(FakeBackend::new().on_platform(PlatformKind::Kubernetes));
    let client = Arc::new(FakeServingClient::new());
    let mut request = request(tmp.path(), &["1.15"], 1);
    request.serving_spec.platform = PlatformConfig::Kubernetes(KubernetesPlatformConfig {
        active_deadline_seconds: 60,
        model_volume: Some(ModelVolume {
            claim_name: "pipeline-root".to_string(),
            mount_path: "/pipeline".to_string(),
        }),
        ..Default::default()
    });

    let err = validator(&backend, &client, options(tmp.path()))
        .validate(request, CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, DomainError::InvalidPlatformConfig { .. }));
    assert!(err.is_configuration_error());
    assert_eq!(backend.launch_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_platform_mismatch_is_configuration_error() {
    let tmp = TempDir::new().unwrap();
    let backend = Arc::new(FakeBackend::new().on_platform(PlatformKind::Kubernetes));
    let client = Arc::new(FakeServingClient::new());

    let err = validator(&backend, &client, options(tmp.path()))
        .validate(request(tmp.path(), &["1.15"], 1), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, DomainError::InvalidPlatformConfig { .. }));
    assert_eq!(backend.launch_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_configuration_error_aborts_run() {
    let tmp = TempDir::new().unwrap();
    let backend = Arc::new(FakeBackend::new().script("1.15", &[Script::Misconfigured]));
    let client = Arc::new(FakeServingClient::new());

    let err = validator(&backend, &client, options(tmp.path()))
        .validate(request(tmp.path(), &["1.15"], 3), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.is_configuration_error());
    assert_eq!(backend.launch_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_stops_retries() {
    let tmp = TempDir::new().unwrap();
    let backend = Arc::new(FakeBackend::new().script("1.15", &[Script::Hang; 3]));
    let client = Arc::new(FakeServingClient::new());
    let validator = validator(&backend, &client, options(tmp.path()));
    let cancel = CancellationToken::new();

    let (verdict, _) = tokio::join!(
        validator.validate(request(tmp.path(), &["1.15"], 3), cancel.clone()),
        async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            cancel.cancel();
        }
    );
    let verdict = verdict.unwrap();

    assert_eq!(verdict.blessing, Blessing::NotBlessed);
    assert_eq!(verdict.versions[0].attempts, 1);
    assert_eq!(backend.launch_count(), 1);
    assert_eq!(backend.teardown_count(), 1);
}

#[test]
fn test_examples_required_with_request_spec() {
    let tmp = TempDir::new().unwrap();
    let mut request = request(tmp.path(), &["1.15"], 1);
    request.request_spec = Some(RequestSpec::tensorflow_serving(Default::default()));

    let err = check_request(&request, &options(tmp.path())).unwrap_err();
    assert!(matches!(err, DomainError::InvalidRequestSpec { .. }));
}

#[test]
fn test_warmup_requires_output_dir() {
    let tmp = TempDir::new().unwrap();
    let request = with_requests(
        request(tmp.path(), &["1.15"], 1),
        RequestSpec::tensorflow_serving(Default::default()).with_warmup(true),
    );

    let err = check_request(&request, &options(tmp.path())).unwrap_err();
    assert!(matches!(err, DomainError::InvalidRequestSpec { .. }));
}
