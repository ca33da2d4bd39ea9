//! PodSpec Factory
//!
//! Construcción de los Pods de servidor de modelos.
//! Separado de KubernetesBackend para poder probar la plantilla sin cluster.
//!
//! Responsabilidades:
//! - Plantilla por defecto (labels, env, puertos, readiness probe)
//! - Fusión con PodOverrides (annotations, env, resources)
//! - Volumen del modelo y owner reference

use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, PersistentVolumeClaimVolumeSource, Pod,
    PodSpec, Probe, ResourceRequirements as K8sResourceRequirements, SecretKeySelector,
    TCPSocketAction, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;

use infra_validator_domain::{
    AttemptId, BinaryVersion, DomainError, EnvVarOverride, KubernetesPlatformConfig,
    ModelLayout, ModelVolume, Result, VersionRef,
};

use super::{GRPC_API_PORT, REST_API_PORT};

pub const SERVER_CONTAINER_NAME: &str = "model-server";
const MODEL_VOLUME_NAME: &str = "model";

/// The pod the validator itself runs in. Server pods are owned by it so the
/// cluster garbage-collects them if the validator dies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorIdentity {
    pub pod_name: String,
    pub namespace: String,
    pub uid: String,
}

/// Configuración base para construcción de PodSpecs
#[derive(Debug, Clone)]
pub struct PodSpecFactoryConfig {
    /// Labels base para todos los pods
    pub base_labels: BTreeMap<String, String>,
    /// Annotations base para todos los pods
    pub base_annotations: BTreeMap<String, String>,
    pub image_pull_policy: String,
}

impl Default for PodSpecFactoryConfig {
    fn default() -> Self {
        Self {
            base_labels: BTreeMap::from([
                ("app".to_string(), "infra-validator-server".to_string()),
                ("infra-validator/managed".to_string(), "true".to_string()),
            ]),
            base_annotations: BTreeMap::new(),
            image_pull_policy: "IfNotPresent".to_string(),
        }
    }
}

/// PodSpecFactory - Plantilla de Pod para un intento de validación
#[derive(Debug, Clone)]
pub struct PodSpecFactory {
    config: PodSpecFactoryConfig,
    platform: KubernetesPlatformConfig,
}

impl PodSpecFactory {
    pub fn new(platform: KubernetesPlatformConfig, config: Option<PodSpecFactoryConfig>) -> Self {
        Self {
            config: config.unwrap_or_default(),
            platform,
        }
    }

    /// Construir el Pod completo para un intento.
    ///
    /// Fails with a configuration error when an env override sets both a
    /// literal value and a secret reference, or when there is no model
    /// volume holding the staged model.
    pub fn build_pod(
        &self,
        attempt_id: &AttemptId,
        version: &BinaryVersion,
        layout: &ModelLayout,
        owner: &OrchestratorIdentity,
    ) -> Result<Pod> {
        self.check_model_volume(layout)?;

        let labels = self.build_labels(attempt_id, version);
        let annotations = self.build_annotations();
        let env_vars = self.build_env_vars(layout)?;
        let resources = self.build_resources();
        let container = self.build_main_container(version, env_vars, resources);

        Ok(self.assemble_pod(
            attempt_id.instance_name(),
            &owner.namespace,
            labels,
            annotations,
            container,
            owner,
        ))
    }

    fn check_model_volume(&self, layout: &ModelLayout) -> Result<()> {
        let volume = self.platform.model_volume.as_ref().ok_or_else(|| {
            DomainError::InvalidPlatformConfig {
                message: "no model_volume to share the staged model with the server pod"
                    .to_string(),
            }
        })?;
        if !layout.is_within(std::path::Path::new(&volume.mount_path)) {
            return Err(DomainError::InvalidPlatformConfig {
                message: format!(
                    "staged model {} is not under the model volume mount {}",
                    layout.base_path.display(),
                    volume.mount_path
                ),
            });
        }
        Ok(())
    }

    fn build_labels(
        &self,
        attempt_id: &AttemptId,
        version: &BinaryVersion,
    ) -> BTreeMap<String, String> {
        let mut labels = self.config.base_labels.clone();
        labels.insert(
            "infra-validator/run-id".to_string(),
            attempt_id.run_id.short(),
        );
        labels.insert(
            "infra-validator/attempt".to_string(),
            attempt_id.attempt.to_string(),
        );
        labels.insert(
            "infra-validator/version-index".to_string(),
            attempt_id.version_index.to_string(),
        );
        // Digests are not valid label values.
        if let VersionRef::Tag(tag) = &version.reference {
            if is_label_value(tag) {
                labels.insert("infra-validator/tag".to_string(), tag.to_string());
            }
        }
        labels
    }

    fn build_annotations(&self) -> BTreeMap<String, String> {
        let mut annotations = self.config.base_annotations.clone();
        for (k, v) in &self.platform.pod_overrides.annotations {
            annotations.insert(k.clone(), v.clone());
        }
        annotations
    }

    fn build_env_vars(&self, layout: &ModelLayout) -> Result<Vec<EnvVar>> {
        // The model volume is mounted at the same path, so the staged
        // location is valid inside the server pod as is.
        let base_path = layout.base_path.to_string_lossy().into_owned();

        let mut env_vars = vec![
            EnvVar {
                name: "MODEL_NAME".to_string(),
                value: Some(layout.model_name.clone()),
                ..Default::default()
            },
            EnvVar {
                name: "MODEL_BASE_PATH".to_string(),
                value: Some(base_path),
                ..Default::default()
            },
        ];

        for env in &self.platform.pod_overrides.env {
            env_vars.push(Self::override_env_var(env)?);
        }

        Ok(env_vars)
    }

    fn override_env_var(env: &EnvVarOverride) -> Result<EnvVar> {
        env.validate()?;
        Ok(EnvVar {
            name: env.name.clone(),
            value: env.value.clone(),
            value_from: env.secret_key_ref.as_ref().map(|secret| EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: secret.name.clone(),
                    key: secret.key.clone(),
                    optional: None,
                }),
                ..Default::default()
            }),
        })
    }

    fn build_resources(&self) -> Option<K8sResourceRequirements> {
        let overrides = &self.platform.pod_overrides.resources;
        if overrides.requests.is_empty() && overrides.limits.is_empty() {
            return None;
        }

        let to_quantities = |map: &BTreeMap<String, String>| -> Option<BTreeMap<String, Quantity>> {
            if map.is_empty() {
                None
            } else {
                Some(
                    map.iter()
                        .map(|(k, v)| (k.clone(), Quantity(v.clone())))
                        .collect(),
                )
            }
        };

        Some(K8sResourceRequirements {
            claims: None,
            requests: to_quantities(&overrides.requests),
            limits: to_quantities(&overrides.limits),
        })
    }

    fn build_volume(volume: &ModelVolume) -> Volume {
        Volume {
            name: MODEL_VOLUME_NAME.to_string(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: volume.claim_name.clone(),
                read_only: Some(true),
            }),
            ..Default::default()
        }
    }

    fn build_volume_mount(volume: &ModelVolume) -> VolumeMount {
        VolumeMount {
            name: MODEL_VOLUME_NAME.to_string(),
            mount_path: volume.mount_path.clone(),
            read_only: Some(true),
            ..Default::default()
        }
    }

    fn build_main_container(
        &self,
        version: &BinaryVersion,
        env_vars: Vec<EnvVar>,
        resources: Option<K8sResourceRequirements>,
    ) -> Container {
        Container {
            name: SERVER_CONTAINER_NAME.to_string(),
            image: Some(version.image()),
            image_pull_policy: Some(self.config.image_pull_policy.clone()),
            env: Some(env_vars),
            resources,
            ports: Some(vec![
                ContainerPort {
                    name: Some("http".to_string()),
                    container_port: REST_API_PORT as i32,
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                },
                ContainerPort {
                    name: Some("grpc".to_string()),
                    container_port: GRPC_API_PORT as i32,
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                },
            ]),
            readiness_probe: Some(Probe {
                tcp_socket: Some(TCPSocketAction {
                    port: IntOrString::Int(REST_API_PORT as i32),
                    host: None,
                }),
                period_seconds: Some(1),
                ..Default::default()
            }),
            volume_mounts: self
                .platform
                .model_volume
                .as_ref()
                .map(|v| vec![Self::build_volume_mount(v)]),
            ..Default::default()
        }
    }

    fn assemble_pod(
        &self,
        pod_name: String,
        namespace: &str,
        labels: BTreeMap<String, String>,
        annotations: BTreeMap<String, String>,
        container: Container,
        owner: &OrchestratorIdentity,
    ) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(pod_name),
                namespace: Some(namespace.to_string()),
                labels: Some(labels),
                annotations: if annotations.is_empty() {
                    None
                } else {
                    Some(annotations)
                },
                owner_references: Some(vec![OwnerReference {
                    api_version: "v1".to_string(),
                    kind: "Pod".to_string(),
                    name: owner.pod_name.clone(),
                    uid: owner.uid.clone(),
                    ..Default::default()
                }]),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![container],
                restart_policy: Some("Never".to_string()),
                service_account_name: self.platform.service_account_name.clone(),
                active_deadline_seconds: Some(self.platform.active_deadline_seconds as i64),
                volumes: self
                    .platform
                    .model_volume
                    .as_ref()
                    .map(|v| vec![Self::build_volume(v)]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

/// Kubernetes label values: at most 63 chars of `[A-Za-z0-9._-]`.
fn is_label_value(value: &str) -> bool {
    value.len() <= 63
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}
