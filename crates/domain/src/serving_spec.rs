// ServingSpec - Qué binario de serving validar y en qué plataforma

use crate::shared_kernel::{DomainError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Image used when none is named.
pub const DEFAULT_TENSORFLOW_SERVING_IMAGE: &str = "tensorflow/serving";

/// Model name used when none is given. Every attempt of a run
/// reuses it so the resolved layout stays valid across retries.
pub const DEFAULT_MODEL_NAME: &str = "infra-validation-model";

/// Default lifetime ceiling for a server pod (24 hours).
pub const DEFAULT_ACTIVE_DEADLINE_SECONDS: u64 = 24 * 60 * 60;

/// Which serving binary to validate and where to run it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServingSpec {
    pub binary: ServingBinary,
    pub platform: PlatformConfig,
    #[serde(default)]
    pub model_name: Option<String>,
}

/// Serving binary kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServingBinary {
    TensorflowServing(TensorflowServingBinary),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorflowServingBinary {
    #[serde(default = "default_image_name")]
    pub image_name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub digests: Vec<String>,
}

fn default_image_name() -> String {
    DEFAULT_TENSORFLOW_SERVING_IMAGE.to_string()
}

impl Default for TensorflowServingBinary {
    fn default() -> Self {
        Self {
            image_name: default_image_name(),
            tags: Vec::new(),
            digests: Vec::new(),
        }
    }
}

/// Referencia de versión: tag o digest
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionRef {
    Tag(String),
    Digest(String),
}

/// One concrete serving binary version; each is validated independently.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BinaryVersion {
    pub image_name: String,
    pub reference: VersionRef,
}

impl BinaryVersion {
    pub fn tag(image_name: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            image_name: image_name.into(),
            reference: VersionRef::Tag(tag.into()),
        }
    }

    pub fn digest(image_name: impl Into<String>, digest: impl Into<String>) -> Self {
        Self {
            image_name: image_name.into(),
            reference: VersionRef::Digest(digest.into()),
        }
    }

    /// Full image reference: `name:tag` or `name@digest`.
    pub fn image(&self) -> String {
        match &self.reference {
            VersionRef::Tag(tag) => format!("{}:{}", self.image_name, tag),
            VersionRef::Digest(digest) => format!("{}@{}", self.image_name, digest),
        }
    }

    pub fn label(&self) -> &str {
        match &self.reference {
            VersionRef::Tag(tag) => tag,
            VersionRef::Digest(digest) => digest,
        }
    }
}

impl fmt::Display for BinaryVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.image())
    }
}

/// Plataforma donde se lanza el servidor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformConfig {
    LocalDocker(LocalDockerConfig),
    Kubernetes(KubernetesPlatformConfig),
}

/// Connection parameters for a local container engine. All optional; when
/// unset the backend discovers the host socket.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalDockerConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KubernetesPlatformConfig {
    #[serde(default)]
    pub service_account_name: Option<String>,
    /// Lifetime ceiling of the server pod. A backstop against leaks, not
    /// the readiness timeout.
    #[serde(default = "default_active_deadline")]
    pub active_deadline_seconds: u64,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub model_volume: Option<ModelVolume>,
    #[serde(default)]
    pub pod_overrides: PodOverrides,
}

fn default_active_deadline() -> u64 {
    DEFAULT_ACTIVE_DEADLINE_SECONDS
}

impl Default for KubernetesPlatformConfig {
    fn default() -> Self {
        Self {
            service_account_name: None,
            active_deadline_seconds: DEFAULT_ACTIVE_DEADLINE_SECONDS,
            namespace: None,
            model_volume: None,
            pod_overrides: PodOverrides::default(),
        }
    }
}

/// PersistentVolumeClaim holding the staged model, mounted read-only at the
/// same path inside the server pod.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVolume {
    pub claim_name: String,
    pub mount_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodOverrides {
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub env: Vec<EnvVarOverride>,
    #[serde(default)]
    pub resources: ResourceOverrides,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceOverrides {
    #[serde(default)]
    pub requests: BTreeMap<String, String>,
    #[serde(default)]
    pub limits: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvVarOverride {
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub secret_key_ref: Option<SecretKeyRef>,
}

impl EnvVarOverride {
    pub fn literal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
            secret_key_ref: None,
        }
    }

    pub fn from_secret(
        name: impl Into<String>,
        secret: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            value: None,
            secret_key_ref: Some(SecretKeyRef {
                name: secret.into(),
                key: key.into(),
            }),
        }
    }

    /// A literal value and a secret reference are mutually exclusive.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(DomainError::InvalidPlatformConfig {
                message: "Environment variable name cannot be empty".to_string(),
            });
        }
        if self.value.is_some() && self.secret_key_ref.is_some() {
            return Err(DomainError::ConflictingEnvVarSource {
                name: self.name.clone(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretKeyRef {
    pub name: String,
    pub key: String,
}

impl ServingSpec {
    pub fn new(binary: ServingBinary, platform: PlatformConfig) -> Self {
        Self {
            binary,
            platform,
            model_name: None,
        }
    }

    pub fn with_model_name(mut self, name: impl Into<String>) -> Self {
        self.model_name = Some(name.into());
        self
    }

    pub fn model_name(&self) -> &str {
        self.model_name.as_deref().unwrap_or(DEFAULT_MODEL_NAME)
    }

    /// Every binary version to validate: tags first, then digests, each a
    /// separate version.
    pub fn versions(&self) -> Vec<BinaryVersion> {
        match &self.binary {
            ServingBinary::TensorflowServing(tfs) => tfs
                .tags
                .iter()
                .map(|tag| BinaryVersion::tag(&tfs.image_name, tag))
                .chain(
                    tfs.digests
                        .iter()
                        .map(|digest| BinaryVersion::digest(&tfs.image_name, digest)),
                )
                .collect(),
        }
    }

    /// Checks every invariant that can be decided before launching anything.
    pub fn validate(&self, validation: &ValidationSpec) -> Result<()> {
        validation.validate()?;

        match &self.binary {
            ServingBinary::TensorflowServing(tfs) => {
                if tfs.image_name.trim().is_empty() {
                    return Err(DomainError::InvalidServingSpec {
                        message: "image_name cannot be empty".to_string(),
                    });
                }
                if tfs.tags.is_empty() && tfs.digests.is_empty() {
                    return Err(DomainError::InvalidServingSpec {
                        message: "at least one tag or digest is required".to_string(),
                    });
                }
                if let Some(tag) = tfs.tags.iter().find(|t| t.trim().is_empty()) {
                    return Err(DomainError::InvalidServingSpec {
                        message: format!("invalid image tag {:?}", tag),
                    });
                }
                if let Some(digest) = tfs.digests.iter().find(|d| !d.contains(':')) {
                    return Err(DomainError::InvalidServingSpec {
                        message: format!(
                            "invalid image digest {:?}, expected <algorithm>:<hex>",
                            digest
                        ),
                    });
                }
            }
        }

        if let Some(name) = &self.model_name {
            if name.is_empty() || name.contains('/') || name.contains(char::is_whitespace) {
                return Err(DomainError::InvalidServingSpec {
                    message: format!("invalid model name {:?}", name),
                });
            }
        }

        match &self.platform {
            PlatformConfig::LocalDocker(docker) => {
                if docker.timeout_seconds == Some(0) {
                    return Err(DomainError::InvalidPlatformConfig {
                        message: "docker client timeout must be positive".to_string(),
                    });
                }
            }
            PlatformConfig::Kubernetes(k8s) => {
                if k8s.active_deadline_seconds <= validation.max_loading_time_seconds {
                    return Err(DomainError::InvalidPlatformConfig {
                        message: format!(
                            "active_deadline_seconds ({}) must be greater than max_loading_time_seconds ({})",
                            k8s.active_deadline_seconds, validation.max_loading_time_seconds
                        ),
                    });
                }
                for env in &k8s.pod_overrides.env {
                    env.validate()?;
                }
                // The server pod only sees the model through this volume.
                let volume = k8s.model_volume.as_ref().ok_or_else(|| {
                    DomainError::InvalidPlatformConfig {
                        message: "kubernetes platform needs a model_volume shared with the server pod"
                            .to_string(),
                    }
                })?;
                if volume.claim_name.is_empty() || !volume.mount_path.starts_with('/') {
                    return Err(DomainError::InvalidPlatformConfig {
                        message: "model_volume needs a claim name and an absolute mount path"
                            .to_string(),
                    });
                }
            }
        }

        Ok(())
    }
}

/// Umbrales de validación
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationSpec {
    #[serde(default = "default_max_loading_time")]
    pub max_loading_time_seconds: u64,
    #[serde(default = "default_num_tries")]
    pub num_tries: u32,
}

fn default_max_loading_time() -> u64 {
    300
}

fn default_num_tries() -> u32 {
    5
}

impl Default for ValidationSpec {
    fn default() -> Self {
        Self {
            max_loading_time_seconds: default_max_loading_time(),
            num_tries: default_num_tries(),
        }
    }
}

impl ValidationSpec {
    pub fn new(max_loading_time_seconds: u64, num_tries: u32) -> Self {
        Self {
            max_loading_time_seconds,
            num_tries,
        }
    }

    pub fn max_loading_time(&self) -> Duration {
        Duration::from_secs(self.max_loading_time_seconds)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_loading_time_seconds == 0 {
            return Err(DomainError::InvalidValidationSpec {
                message: "max_loading_time_seconds must be positive".to_string(),
            });
        }
        if self.num_tries == 0 {
            return Err(DomainError::InvalidValidationSpec {
                message: "num_tries must be positive".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn tfs(tags: &[&str], digests: &[&str]) -> ServingBinary {
        ServingBinary::TensorflowServing(TensorflowServingBinary {
            tags: tags.iter().map(|s| s.to_string()).collect(),
            digests: digests.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        })
    }

    fn k8s_spec(active_deadline_seconds: u64) -> ServingSpec {
        ServingSpec::new(
            tfs(&["2.15.0"], &[]),
            PlatformConfig::Kubernetes(KubernetesPlatformConfig {
                active_deadline_seconds,
                model_volume: Some(ModelVolume {
                    claim_name: "pipeline-root".to_string(),
                    mount_path: "/pipeline".to_string(),
                }),
                ..Default::default()
            }),
        )
    }

    #[test]
    fn test_versions_fan_out_tags_and_digests() {
        let spec = ServingSpec::new(
            tfs(&["latest", "2.15.0"], &["sha256:abc"]),
            PlatformConfig::LocalDocker(LocalDockerConfig::default()),
        );

        let versions = spec.versions();
        assert_eq!(versions.len(), 3);
        assert_eq!(versions[0].image(), "tensorflow/serving:latest");
        assert_eq!(versions[1].image(), "tensorflow/serving:2.15.0");
        assert_eq!(versions[2].image(), "tensorflow/serving@sha256:abc");
        assert_eq!(versions[2].label(), "sha256:abc");
    }

    #[test]
    fn test_model_name_defaults_to_stable_identifier() {
        let spec = k8s_spec(600);
        assert_eq!(spec.model_name(), DEFAULT_MODEL_NAME);
        assert_eq!(spec.clone().with_model_name("chicago").model_name(), "chicago");
    }

    #[test]
    fn test_requires_at_least_one_version() {
        let spec = ServingSpec::new(
            tfs(&[], &[]),
            PlatformConfig::LocalDocker(LocalDockerConfig::default()),
        );
        let err = spec.validate(&ValidationSpec::default()).unwrap_err();
        assert!(matches!(err, DomainError::InvalidServingSpec { .. }));
    }

    #[rstest]
    #[case(300, 300, false)]
    #[case(299, 300, false)]
    #[case(301, 300, true)]
    fn test_active_deadline_must_exceed_loading_time(
        #[case] active_deadline: u64,
        #[case] max_loading: u64,
        #[case] valid: bool,
    ) {
        let result = k8s_spec(active_deadline).validate(&ValidationSpec::new(max_loading, 1));
        assert_eq!(result.is_ok(), valid);
        if !valid {
            assert!(result.unwrap_err().is_configuration_error());
        }
    }

    #[test]
    fn test_env_var_with_value_and_secret_is_rejected() {
        let mut spec = k8s_spec(600);
        if let PlatformConfig::Kubernetes(k8s) = &mut spec.platform {
            k8s.pod_overrides.env.push(EnvVarOverride {
                name: "API_KEY".to_string(),
                value: Some("plain".to_string()),
                secret_key_ref: Some(SecretKeyRef {
                    name: "creds".to_string(),
                    key: "api-key".to_string(),
                }),
            });
        }

        let err = spec.validate(&ValidationSpec::new(60, 1)).unwrap_err();
        assert!(matches!(err, DomainError::ConflictingEnvVarSource { name } if name == "API_KEY"));
    }

    #[test]
    fn test_kubernetes_requires_model_volume() {
        let mut spec = k8s_spec(600);
        if let PlatformConfig::Kubernetes(k8s) = &mut spec.platform {
            k8s.model_volume = None;
        }

        let err = spec.validate(&ValidationSpec::new(60, 1)).unwrap_err();
        assert!(matches!(err, DomainError::InvalidPlatformConfig { .. }));
        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_kubernetes_model_volume_needs_absolute_mount() {
        let mut spec = k8s_spec(600);
        if let PlatformConfig::Kubernetes(k8s) = &mut spec.platform {
            k8s.model_volume = Some(ModelVolume {
                claim_name: "pipeline-root".to_string(),
                mount_path: "pipeline".to_string(),
            });
        }
        assert!(spec.validate(&ValidationSpec::new(60, 1)).is_err());
    }

    #[rstest]
    #[case(0, 1)]
    #[case(10, 0)]
    fn test_validation_spec_requires_positive_values(#[case] loading: u64, #[case] tries: u32) {
        assert!(ValidationSpec::new(loading, tries).validate().is_err());
    }

    #[test]
    fn test_invalid_digest_rejected() {
        let spec = ServingSpec::new(
            tfs(&[], &["abc"]),
            PlatformConfig::LocalDocker(LocalDockerConfig::default()),
        );
        assert!(spec.validate(&ValidationSpec::default()).is_err());
    }

    #[test]
    fn test_deserialize_from_json() {
        let json = r#"{
            "binary": {"tensorflow_serving": {"tags": ["2.15.0"]}},
            "platform": {"kubernetes": {"active_deadline_seconds": 900}},
            "model_name": "taxi"
        }"#;
        let spec: ServingSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.model_name(), "taxi");
        assert_eq!(spec.versions()[0].image(), "tensorflow/serving:2.15.0");
        match spec.platform {
            PlatformConfig::Kubernetes(k8s) => assert_eq!(k8s.active_deadline_seconds, 900),
            other => panic!("unexpected platform {:?}", other),
        }
    }
}
