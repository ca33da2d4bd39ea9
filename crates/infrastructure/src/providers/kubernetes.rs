//! Kubernetes Runtime Backend Implementation
//!
//! Runs each validation attempt as a model server Pod next to the validator.
//! Uses kube-rs for native Kubernetes API interaction.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::{
    Client, Config,
    api::{Api, DeleteParams, ListParams, PostParams},
};
use std::path::Path;
use tracing::{debug, info, warn};

use infra_validator_domain::{
    AttemptId, BackendError, BinaryVersion, HealthStatus, InstanceState,
    KubernetesPlatformConfig, ModelLayout, PlatformKind, RuntimeBackend, ServerHandle,
};

use super::REST_API_PORT;
use super::pod_spec_factory::{OrchestratorIdentity, PodSpecFactory, SERVER_CONTAINER_NAME};

/// Namespace of the service account the validator runs under.
pub const SERVICE_ACCOUNT_NAMESPACE_FILE: &str =
    "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

const DELETE_GRACE_SECS: u32 = 5;

/// Waiting reasons that will not resolve by themselves.
const FATAL_WAITING_REASONS: &[&str] = &[
    "ErrImagePull",
    "ImagePullBackOff",
    "InvalidImageName",
    "CreateContainerConfigError",
];

/// Where the validator itself runs. Both fields usually come from the
/// downward API.
#[derive(Debug, Clone, Default)]
pub struct KubernetesIdentityConfig {
    pub pod_name: Option<String>,
    pub namespace: Option<String>,
}

impl KubernetesIdentityConfig {
    /// Namespace from config, else from the mounted service account.
    pub fn resolve_namespace(&self, namespace_file: &Path) -> Option<String> {
        self.namespace.clone().or_else(|| {
            std::fs::read_to_string(namespace_file)
                .ok()
                .map(|ns| ns.trim().to_string())
                .filter(|ns| !ns.is_empty())
        })
    }
}

/// Kubernetes backend creating one ephemeral Pod per attempt
#[derive(Clone)]
pub struct KubernetesBackend {
    client: Client,
    identity: OrchestratorIdentity,
    factory: PodSpecFactory,
}

impl KubernetesBackend {
    /// Connect with the inferred cluster config and look up the validator's
    /// own pod.
    pub async fn new(
        platform: KubernetesPlatformConfig,
        identity: KubernetesIdentityConfig,
    ) -> Result<Self, BackendError> {
        // Fail on missing identity before touching the API server.
        let (pod_name, namespace) = Self::check_identity(&platform, &identity)?;
        let client = Self::create_client().await?;
        let identity = Self::lookup_identity(&client, &pod_name, &namespace).await?;
        Ok(Self::with_client(client, identity, platform))
    }

    pub fn with_client(
        client: Client,
        identity: OrchestratorIdentity,
        platform: KubernetesPlatformConfig,
    ) -> Self {
        Self {
            client,
            identity,
            factory: PodSpecFactory::new(platform, None),
        }
    }

    fn check_identity(
        platform: &KubernetesPlatformConfig,
        identity: &KubernetesIdentityConfig,
    ) -> Result<(String, String), BackendError> {
        let pod_name = identity.pod_name.clone().filter(|n| !n.is_empty()).ok_or_else(|| {
            BackendError::InvalidConfiguration(
                "Validator pod name is unknown; set INFRA_VALIDATOR_POD_NAME".to_string(),
            )
        })?;

        let namespace = identity
            .resolve_namespace(Path::new(SERVICE_ACCOUNT_NAMESPACE_FILE))
            .ok_or_else(|| {
                BackendError::InvalidConfiguration(
                    "Validator namespace is unknown; set INFRA_VALIDATOR_NAMESPACE".to_string(),
                )
            })?;

        // Owner references cannot cross namespaces.
        if let Some(requested) = &platform.namespace {
            if requested != &namespace {
                return Err(BackendError::InvalidConfiguration(format!(
                    "Server pods must run in the validator namespace {}, not {}",
                    namespace, requested
                )));
            }
        }

        Ok((pod_name, namespace))
    }

    async fn create_client() -> Result<Client, BackendError> {
        let kube_config = Config::infer().await.map_err(|e| {
            BackendError::ConnectionFailed(format!("Failed to infer Kubernetes config: {}", e))
        })?;

        Client::try_from(kube_config).map_err(|e| {
            BackendError::ConnectionFailed(format!("Failed to create Kubernetes client: {}", e))
        })
    }

    async fn lookup_identity(
        client: &Client,
        pod_name: &str,
        namespace: &str,
    ) -> Result<OrchestratorIdentity, BackendError> {
        let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
        let pod = match pods.get(pod_name).await {
            Ok(pod) => pod,
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                return Err(BackendError::InvalidConfiguration(format!(
                    "Validator pod {}/{} does not exist",
                    namespace, pod_name
                )));
            }
            Err(e) => {
                return Err(BackendError::ConnectionFailed(format!(
                    "Failed to get validator pod {}/{}: {}",
                    namespace, pod_name, e
                )));
            }
        };

        let uid = pod.metadata.uid.ok_or_else(|| {
            BackendError::Internal(format!("Validator pod {} has no uid", pod_name))
        })?;
        debug!("Validator pod {}/{} has uid {}", namespace, pod_name, uid);

        Ok(OrchestratorIdentity {
            pod_name: pod_name.to_string(),
            namespace: namespace.to_string(),
            uid,
        })
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.identity.namespace)
    }

    /// Map Kubernetes Pod status to InstanceState
    fn map_pod_status(pod: &Pod) -> InstanceState {
        let status = pod.status.as_ref();
        let phase = status.and_then(|s| s.phase.as_deref());

        if let Some(reason) = Self::fatal_waiting_reason(pod) {
            return InstanceState::Crashed { reason };
        }

        match phase {
            Some("Running") if Self::is_container_ready(pod) => InstanceState::Ready,
            Some("Failed") | Some("Succeeded") => InstanceState::Crashed {
                reason: format!(
                    "pod phase {}{}",
                    phase.unwrap_or_default(),
                    status
                        .and_then(|s| s.reason.as_deref())
                        .map(|r| format!(": {}", r))
                        .unwrap_or_default()
                ),
            },
            _ => InstanceState::Loading,
        }
    }

    /// Check that every container is ready
    fn is_container_ready(pod: &Pod) -> bool {
        pod.status
            .as_ref()
            .and_then(|s| s.container_statuses.as_ref())
            .map(|statuses| !statuses.is_empty() && statuses.iter().all(|cs| cs.ready))
            .unwrap_or(false)
    }

    fn fatal_waiting_reason(pod: &Pod) -> Option<String> {
        pod.status
            .as_ref()?
            .container_statuses
            .as_ref()?
            .iter()
            .filter(|cs| cs.name == SERVER_CONTAINER_NAME)
            .filter_map(|cs| cs.state.as_ref()?.waiting.as_ref())
            .find_map(|waiting| {
                let reason = waiting.reason.as_deref()?;
                FATAL_WAITING_REASONS.contains(&reason).then(|| {
                    match waiting.message.as_deref() {
                        Some(message) => format!("{}: {}", reason, message),
                        None => reason.to_string(),
                    }
                })
            })
    }
}

#[async_trait]
impl RuntimeBackend for KubernetesBackend {
    fn platform(&self) -> PlatformKind {
        PlatformKind::Kubernetes
    }

    async fn launch(
        &self,
        attempt_id: &AttemptId,
        version: &BinaryVersion,
        layout: &ModelLayout,
    ) -> Result<ServerHandle, BackendError> {
        let pod = self
            .factory
            .build_pod(attempt_id, version, layout, &self.identity)?;
        let pod_name = attempt_id.instance_name();
        info!("Creating model server Pod {} ({})", pod_name, version);

        let created_pod = self
            .pods()
            .create(&PostParams::default(), &pod)
            .await
            .map_err(|e| match e {
                kube::Error::Api(ae) if ae.code == 403 || ae.code == 422 => {
                    BackendError::InvalidConfiguration(format!(
                        "Pod {} rejected by the API server: {}",
                        pod_name, ae.message
                    ))
                }
                other => BackendError::LaunchFailed(format!("Failed to create Pod: {}", other)),
            })?;

        let pod_uid = created_pod
            .metadata
            .uid
            .clone()
            .unwrap_or_else(|| pod_name.clone());

        info!("Model server Pod {} created (uid: {})", pod_name, pod_uid);

        Ok(ServerHandle::new(
            attempt_id.clone(),
            pod_name.clone(),
            pod_name,
            PlatformKind::Kubernetes,
            version.image(),
        )
        .with_metadata("namespace", serde_json::json!(self.identity.namespace))
        .with_metadata("pod_uid", serde_json::json!(pod_uid)))
    }

    async fn poll(&self, handle: &ServerHandle) -> Result<InstanceState, BackendError> {
        let pod = self.pods().get_opt(&handle.resource_id).await.map_err(|e| {
            BackendError::Internal(format!("Failed to get Pod {}: {}", handle.resource_id, e))
        })?;

        match pod {
            Some(p) => Ok(Self::map_pod_status(&p)),
            None => Ok(InstanceState::Crashed {
                reason: format!("pod {} no longer exists", handle.resource_id),
            }),
        }
    }

    async fn endpoint(&self, handle: &ServerHandle) -> Result<String, BackendError> {
        let pod = self
            .pods()
            .get_opt(&handle.resource_id)
            .await
            .map_err(|e| {
                BackendError::Internal(format!("Failed to get Pod {}: {}", handle.resource_id, e))
            })?
            .ok_or_else(|| BackendError::InstanceNotFound(handle.resource_id.clone()))?;

        let pod_ip = pod
            .status
            .and_then(|s| s.pod_ip)
            .filter(|ip| !ip.is_empty())
            .ok_or_else(|| {
                BackendError::EndpointUnavailable(format!(
                    "Pod {} has no IP yet",
                    handle.resource_id
                ))
            })?;

        Ok(format!("http://{}:{}", pod_ip, REST_API_PORT))
    }

    async fn teardown(&self, handle: &ServerHandle) -> Result<(), BackendError> {
        let pod_name = &handle.resource_id;
        info!("Deleting model server Pod {}", pod_name);

        let dp = DeleteParams {
            grace_period_seconds: Some(DELETE_GRACE_SECS),
            ..Default::default()
        };

        match self.pods().delete(pod_name, &dp).await {
            Ok(_) => {
                info!("Pod {} deleted", pod_name);
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!("Pod {} already deleted", pod_name);
                Ok(())
            }
            Err(e) => Err(BackendError::Internal(format!(
                "Failed to delete Pod {}: {}",
                pod_name, e
            ))),
        }
    }

    async fn health_check(&self) -> Result<HealthStatus, BackendError> {
        match self.pods().list(&ListParams::default().limit(1)).await {
            Ok(_) => Ok(HealthStatus::Healthy),
            Err(kube::Error::Api(ae)) if ae.code == 403 => {
                warn!("Cannot list pods in {}", self.identity.namespace);
                Ok(HealthStatus::Degraded {
                    reason: format!(
                        "Insufficient permissions in namespace {}",
                        self.identity.namespace
                    ),
                })
            }
            Err(e) => Ok(HealthStatus::Unhealthy {
                reason: format!("Failed to connect to Kubernetes API: {}", e),
            }),
        }
    }
}
