//! Shared fakes for orchestrator tests.

#![allow(dead_code)]

use async_trait::async_trait;
use infra_validator_domain::{
    AttemptId, BackendError, BinaryVersion, Example, ExampleSource, InstanceState, ModelLayout,
    ModelState, PlatformKind, ProbeError, ProbeRequest, Result, RuntimeBackend, ServerHandle,
    ServingClient,
};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// How one launched server behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    /// Becomes ready and answers every request.
    Serve,
    /// Exits while loading.
    Crash,
    /// Never becomes ready.
    Hang,
    /// Launch itself fails.
    LaunchFails,
    /// Launch is rejected as misconfigured.
    Misconfigured,
    /// Ready, but every inference request errors.
    RejectRequests,
}

impl Script {
    fn key(&self) -> &'static str {
        match self {
            Script::Serve => "serve",
            Script::Crash => "crash",
            Script::Hang => "hang",
            Script::LaunchFails => "launch-fails",
            Script::Misconfigured => "misconfigured",
            Script::RejectRequests => "reject-requests",
        }
    }
}

/// Runtime backend replaying a per-version script, one entry per launch.
/// Versions without script entries left serve normally.
#[derive(Default)]
pub struct FakeBackend {
    platform: Option<PlatformKind>,
    scripts: Mutex<HashMap<String, VecDeque<Script>>>,
    live: Mutex<HashSet<String>>,
    pub launches: Mutex<Vec<AttemptId>>,
    pub teardowns: Mutex<Vec<AttemptId>>,
    pub overlapping_launches: AtomicUsize,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_platform(mut self, platform: PlatformKind) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn script(self, version_label: &str, script: &[Script]) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(version_label.to_string(), script.iter().copied().collect());
        self
    }

    pub fn launch_count(&self) -> usize {
        self.launches.lock().unwrap().len()
    }

    pub fn teardown_count(&self) -> usize {
        self.teardowns.lock().unwrap().len()
    }

    pub fn launches_for(&self, version_index: usize) -> usize {
        self.launches
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.version_index == version_index)
            .count()
    }

    fn next_script(&self, version: &BinaryVersion) -> Script {
        self.scripts
            .lock()
            .unwrap()
            .get_mut(version.label())
            .and_then(|queue| queue.pop_front())
            .unwrap_or(Script::Serve)
    }

    fn script_of(handle: &ServerHandle) -> String {
        handle.metadata["script"].as_str().unwrap_or("serve").to_string()
    }
}

#[async_trait]
impl RuntimeBackend for FakeBackend {
    fn platform(&self) -> PlatformKind {
        self.platform.unwrap_or(PlatformKind::LocalDocker)
    }

    async fn launch(
        &self,
        attempt_id: &AttemptId,
        version: &BinaryVersion,
        layout: &ModelLayout,
    ) -> std::result::Result<ServerHandle, BackendError> {
        assert!(layout.version_dir().is_dir(), "layout must exist before launch");

        let script = self.next_script(version);
        match script {
            Script::LaunchFails => {
                return Err(BackendError::LaunchFailed("image not found".to_string()));
            }
            Script::Misconfigured => {
                return Err(BackendError::InvalidConfiguration(
                    "service account not allowed".to_string(),
                ));
            }
            _ => {}
        }

        if !self.live.lock().unwrap().insert(version.label().to_string()) {
            self.overlapping_launches.fetch_add(1, Ordering::SeqCst);
        }
        self.launches.lock().unwrap().push(attempt_id.clone());

        Ok(ServerHandle::new(
            attempt_id.clone(),
            attempt_id.instance_name(),
            attempt_id.instance_name(),
            self.platform(),
            version.image(),
        )
        .with_metadata("script", serde_json::json!(script.key()))
        .with_metadata("version", serde_json::json!(version.label())))
    }

    async fn poll(
        &self,
        handle: &ServerHandle,
    ) -> std::result::Result<InstanceState, BackendError> {
        Ok(match Self::script_of(handle).as_str() {
            "crash" => InstanceState::Crashed {
                reason: "exit code 1".to_string(),
            },
            "hang" => InstanceState::Loading,
            _ => InstanceState::Ready,
        })
    }

    async fn endpoint(&self, handle: &ServerHandle) -> std::result::Result<String, BackendError> {
        Ok(format!(
            "http://{}.{}.invalid:8501",
            handle.instance_name,
            Self::script_of(handle)
        ))
    }

    async fn teardown(&self, handle: &ServerHandle) -> std::result::Result<(), BackendError> {
        if let Some(version) = handle.metadata["version"].as_str() {
            self.live.lock().unwrap().remove(version);
        }
        self.teardowns.lock().unwrap().push(handle.attempt_id.clone());
        Ok(())
    }
}

/// Serving client that reports every model available and rejects requests
/// to servers scripted with `RejectRequests`.
#[derive(Default)]
pub struct FakeServingClient {
    pub sent: Mutex<Vec<ProbeRequest>>,
}

impl FakeServingClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl ServingClient for FakeServingClient {
    async fn model_state(
        &self,
        _endpoint: &str,
        _model_name: &str,
    ) -> std::result::Result<ModelState, ProbeError> {
        Ok(ModelState::Available)
    }

    async fn send(
        &self,
        endpoint: &str,
        request: &ProbeRequest,
    ) -> std::result::Result<(), ProbeError> {
        self.sent.lock().unwrap().push(request.clone());
        if endpoint.contains(".reject-requests.") {
            return Err(ProbeError::ErrorResponse {
                status: 400,
                body: "{\"error\": \"bad input\"}".to_string(),
            });
        }
        Ok(())
    }
}

pub struct InMemoryExamples {
    splits: BTreeMap<String, Vec<Example>>,
}

impl InMemoryExamples {
    pub fn with_split(split: &str, count: usize) -> Self {
        Self {
            splits: BTreeMap::from([(
                split.to_string(),
                (0..count).map(|i| serde_json::json!({ "id": i })).collect(),
            )]),
        }
    }
}

impl ExampleSource for InMemoryExamples {
    fn split_names(&self) -> Result<Vec<String>> {
        Ok(self.splits.keys().cloned().collect())
    }

    fn read_examples(&self, split: &str, limit: usize) -> Result<Vec<Example>> {
        Ok(self
            .splits
            .get(split)
            .map(|examples| examples.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

/// A minimal exported model that does not follow the serving layout.
pub fn exported_model(root: &Path) -> PathBuf {
    let dir = root.join("trainer/export");
    std::fs::create_dir_all(dir.join("variables")).unwrap();
    std::fs::write(dir.join("saved_model.pb"), b"graph").unwrap();
    std::fs::write(dir.join("variables/variables.index"), b"index").unwrap();
    dir
}
