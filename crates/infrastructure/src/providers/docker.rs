//! Docker Runtime Backend Implementation
//!
//! Runs each validation attempt as a local TensorFlow Serving container.
//! Uses bollard for Docker API communication.

use async_trait::async_trait;
use bollard::{
    ClientVersion, Docker,
    errors::Error as BollardError,
    models::{
        ContainerCreateBody, ContainerInspectResponse, ContainerStateStatusEnum, HostConfig,
        Mount, MountTypeEnum, PortBinding,
    },
    query_parameters::{
        CreateContainerOptionsBuilder, CreateImageOptionsBuilder, InspectContainerOptions,
        RemoveContainerOptionsBuilder, StartContainerOptions, StopContainerOptionsBuilder,
    },
};
use futures_util::StreamExt;
use infra_validator_domain::{
    AttemptId, BackendError, BinaryVersion, HealthStatus, InstanceState, LocalDockerConfig,
    ModelLayout, PlatformKind, RuntimeBackend, ServerHandle,
};
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

use super::{CONTAINER_MODEL_BASE_PATH, REST_API_PORT};

const DEFAULT_SOCKET: &str = "/var/run/docker.sock";
const DEFAULT_TIMEOUT_SECS: u64 = 120;
const STOP_GRACE_SECS: i32 = 10;

/// Docker backend for ephemeral model server containers.
#[derive(Clone)]
pub struct DockerBackend {
    client: Docker,
    /// Host the published ports are reachable on
    endpoint_host: String,
}

/// Builder for DockerBackend
pub struct DockerBackendBuilder {
    config: Option<LocalDockerConfig>,
    client: Option<Docker>,
}

impl DockerBackendBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            client: None,
        }
    }

    pub fn with_config(mut self, config: LocalDockerConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_client(mut self, client: Docker) -> Self {
        self.client = Some(client);
        self
    }

    /// Build the DockerBackend, connecting to the daemon when no client was
    /// supplied.
    pub async fn build(self) -> Result<DockerBackend, BackendError> {
        let config = self.config.unwrap_or_default();
        let endpoint_host = Self::endpoint_host(&config);

        let client = match self.client {
            Some(c) => c,
            None => Self::create_docker_client(&config).await?,
        };

        Ok(DockerBackend {
            client,
            endpoint_host,
        })
    }

    async fn create_docker_client(config: &LocalDockerConfig) -> Result<Docker, BackendError> {
        let timeout = config.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECS);
        let version = Self::client_version(config)?;

        if let Some(base_url) = &config.base_url {
            let client = if let Some(path) = base_url.strip_prefix("unix://") {
                Docker::connect_with_socket(path, timeout, &version)
            } else {
                Docker::connect_with_http(base_url, timeout, &version)
            }
            .map_err(|e| {
                BackendError::InvalidConfiguration(format!(
                    "Invalid Docker base_url {}: {}",
                    base_url, e
                ))
            })?;

            client.ping().await.map_err(|e| {
                BackendError::ConnectionFailed(format!(
                    "Docker daemon at {} unreachable: {}",
                    base_url, e
                ))
            })?;
            info!("Docker client connected via {}", base_url);
            return Ok(client);
        }

        // Try multiple socket locations in order of preference:
        // 1. DOCKER_HOST environment variable
        // 2. Docker Desktop socket (~/.docker/desktop/docker.sock)
        // 3. Podman rootless socket
        // 4. Default socket (/var/run/docker.sock)
        let socket_paths = Self::get_socket_paths();

        for socket_path in &socket_paths {
            debug!("Trying Docker socket: {}", socket_path);

            match Docker::connect_with_socket(socket_path, timeout, &version) {
                Ok(client) => {
                    if client.ping().await.is_ok() {
                        info!("Docker client connected successfully via {}", socket_path);
                        return Ok(client);
                    }
                }
                Err(e) => {
                    debug!("Failed to connect to {}: {}", socket_path, e);
                }
            }
        }

        Err(BackendError::ConnectionFailed(format!(
            "Failed to connect to Docker daemon. Tried sockets: {:?}",
            socket_paths
        )))
    }

    fn client_version(config: &LocalDockerConfig) -> Result<ClientVersion, BackendError> {
        let Some(raw) = &config.api_version else {
            return Ok(bollard::API_DEFAULT_VERSION.clone());
        };

        let parsed = raw
            .trim_start_matches('v')
            .split_once('.')
            .and_then(|(major, minor)| Some((major.parse().ok()?, minor.parse().ok()?)));

        match parsed {
            Some((major_version, minor_version)) => Ok(ClientVersion {
                major_version,
                minor_version,
            }),
            None => Err(BackendError::InvalidConfiguration(format!(
                "Invalid Docker API version {:?}, expected <major>.<minor>",
                raw
            ))),
        }
    }

    fn get_socket_paths() -> Vec<String> {
        let mut paths = Vec::new();

        if let Ok(docker_host) = std::env::var("DOCKER_HOST") {
            if let Some(path) = docker_host.strip_prefix("unix://") {
                paths.push(path.to_string());
            }
        }

        if let Ok(home) = std::env::var("HOME") {
            let desktop_socket = format!("{}/.docker/desktop/docker.sock", home);
            if std::path::Path::new(&desktop_socket).exists() {
                paths.push(desktop_socket);
            }
        }

        if let Ok(xdg_runtime) = std::env::var("XDG_RUNTIME_DIR") {
            let podman_socket = format!("{}/podman/podman.sock", xdg_runtime);
            if std::path::Path::new(&podman_socket).exists() {
                paths.push(podman_socket);
            }
        }

        paths.push(DEFAULT_SOCKET.to_string());
        paths
    }

    /// Published ports bind to loopback, unless the daemon is remote.
    fn endpoint_host(config: &LocalDockerConfig) -> String {
        config
            .base_url
            .as_deref()
            .and_then(|url| {
                url.strip_prefix("tcp://")
                    .or_else(|| url.strip_prefix("http://"))
                    .or_else(|| url.strip_prefix("https://"))
            })
            .and_then(|rest| rest.split([':', '/']).next())
            .filter(|host| !host.is_empty())
            .unwrap_or("127.0.0.1")
            .to_string()
    }
}

impl Default for DockerBackendBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerBackend {
    pub fn builder() -> DockerBackendBuilder {
        DockerBackendBuilder::new()
    }

    /// Connect with the given local platform configuration.
    pub async fn with_config(config: LocalDockerConfig) -> Result<Self, BackendError> {
        DockerBackendBuilder::new().with_config(config).build().await
    }

    fn rest_port_key() -> String {
        format!("{}/tcp", REST_API_PORT)
    }

    /// Container configuration: model bind-mounted read-only, REST port
    /// published on an ephemeral host port.
    fn create_container_config(
        endpoint_host: &str,
        attempt_id: &AttemptId,
        version: &BinaryVersion,
        layout: &ModelLayout,
        model_source: &str,
    ) -> ContainerCreateBody {
        let env_vars = vec![
            format!("MODEL_NAME={}", layout.model_name),
            format!("MODEL_BASE_PATH={}", CONTAINER_MODEL_BASE_PATH),
        ];

        let labels = HashMap::from([
            ("infra-validator.managed".to_string(), "true".to_string()),
            (
                "infra-validator.run-id".to_string(),
                attempt_id.run_id.to_string(),
            ),
            (
                "infra-validator.attempt".to_string(),
                attempt_id.attempt.to_string(),
            ),
            (
                "infra-validator.version".to_string(),
                version.label().to_string(),
            ),
        ]);

        let port_key = Self::rest_port_key();
        let port_bindings = HashMap::from([(
            port_key.clone(),
            Some(vec![PortBinding {
                host_ip: Some(if endpoint_host == "127.0.0.1" {
                    "127.0.0.1".to_string()
                } else {
                    "0.0.0.0".to_string()
                }),
                host_port: None,
            }]),
        )]);

        let host_config = HostConfig {
            mounts: Some(vec![Mount {
                target: Some(format!(
                    "{}/{}",
                    CONTAINER_MODEL_BASE_PATH, layout.model_name
                )),
                source: Some(model_source.to_string()),
                typ: Some(MountTypeEnum::BIND),
                read_only: Some(true),
                ..Default::default()
            }]),
            port_bindings: Some(port_bindings),
            auto_remove: Some(false),
            ..Default::default()
        };

        ContainerCreateBody {
            image: Some(version.image()),
            env: Some(env_vars),
            labels: Some(labels),
            exposed_ports: Some(HashMap::from([(port_key, HashMap::new())])),
            host_config: Some(host_config),
            ..Default::default()
        }
    }

    /// Ensure image is available locally
    async fn ensure_image(&self, image: &str) -> Result<(), BackendError> {
        if self.client.inspect_image(image).await.is_ok() {
            debug!("Image {} already exists locally", image);
            return Ok(());
        }

        info!("Pulling image {}", image);
        let options = CreateImageOptionsBuilder::default()
            .from_image(image)
            .build();

        let mut stream = self.client.create_image(Some(options), None, None);

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!("Pull status: {}", status);
                    }
                }
                Err(e) => {
                    return Err(BackendError::ImagePullFailed {
                        image: image.to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        info!("Image {} pulled successfully", image);
        Ok(())
    }

    async fn inspect(
        &self,
        handle: &ServerHandle,
    ) -> Result<ContainerInspectResponse, BackendError> {
        self.client
            .inspect_container(&handle.resource_id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| match e {
                BollardError::DockerResponseServerError {
                    status_code: 404, ..
                } => BackendError::InstanceNotFound(handle.instance_name.clone()),
                other => BackendError::Internal(format!(
                    "Failed to inspect container {}: {}",
                    handle.instance_name, other
                )),
            })
    }

    /// Map container state to InstanceState
    fn map_container_state(
        status: Option<&ContainerStateStatusEnum>,
        exit_code: Option<i64>,
    ) -> InstanceState {
        match status {
            Some(ContainerStateStatusEnum::RUNNING) => InstanceState::Ready,
            Some(ContainerStateStatusEnum::EXITED) | Some(ContainerStateStatusEnum::DEAD) => {
                InstanceState::Crashed {
                    reason: format!(
                        "container exited with code {}",
                        exit_code.map_or_else(|| "unknown".to_string(), |c| c.to_string())
                    ),
                }
            }
            Some(ContainerStateStatusEnum::REMOVING) => InstanceState::Crashed {
                reason: "container is being removed".to_string(),
            },
            Some(ContainerStateStatusEnum::CREATED)
            | Some(ContainerStateStatusEnum::RESTARTING)
            | Some(ContainerStateStatusEnum::PAUSED)
            | Some(ContainerStateStatusEnum::EMPTY)
            | None => InstanceState::Loading,
        }
    }

    /// Host port published for the REST API, if any.
    fn published_port(inspect: &ContainerInspectResponse) -> Option<String> {
        inspect
            .network_settings
            .as_ref()?
            .ports
            .as_ref()?
            .get(&Self::rest_port_key())?
            .as_ref()?
            .iter()
            .find_map(|binding| binding.host_port.clone())
            .filter(|port| !port.is_empty())
    }

    async fn remove_container(&self, container_id: &str) -> Result<(), BackendError> {
        let remove_options = RemoveContainerOptionsBuilder::default()
            .force(true)
            .v(true)
            .build();

        match self
            .client
            .remove_container(container_id, Some(remove_options))
            .await
        {
            Ok(()) => Ok(()),
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                debug!("Container {} already removed", container_id);
                Ok(())
            }
            Err(e) => Err(BackendError::Internal(format!(
                "Failed to remove container {}: {}",
                container_id, e
            ))),
        }
    }
}

#[async_trait]
impl RuntimeBackend for DockerBackend {
    fn platform(&self) -> PlatformKind {
        PlatformKind::LocalDocker
    }

    async fn launch(
        &self,
        attempt_id: &AttemptId,
        version: &BinaryVersion,
        layout: &ModelLayout,
    ) -> Result<ServerHandle, BackendError> {
        let container_name = attempt_id.instance_name();
        info!("Launching Docker model server {} ({})", container_name, version);

        // Bind mounts need an absolute host path.
        let model_source = std::fs::canonicalize(layout.model_dir()).map_err(|e| {
            BackendError::LaunchFailed(format!(
                "Model directory {} is not accessible: {}",
                layout.model_dir().display(),
                e
            ))
        })?;

        self.ensure_image(&version.image()).await?;

        let config = Self::create_container_config(
            &self.endpoint_host,
            attempt_id,
            version,
            layout,
            &model_source.to_string_lossy(),
        );

        let options = CreateContainerOptionsBuilder::default()
            .name(&container_name)
            .build();

        let container = self
            .client
            .create_container(Some(options), config)
            .await
            .map_err(|e| BackendError::LaunchFailed(format!("Failed to create container: {}", e)))?;

        let container_id = container.id.clone();
        debug!("Container created: {}", container_id);

        if let Err(e) = self
            .client
            .start_container(&container_id, None::<StartContainerOptions>)
            .await
        {
            error!("Failed to start container {}: {}", container_name, e);
            if let Err(cleanup) = self.remove_container(&container_id).await {
                warn!("Failed to remove unstarted container: {}", cleanup);
            }
            return Err(BackendError::LaunchFailed(format!(
                "Failed to start container: {}",
                e
            )));
        }

        info!(
            "Model server {} started in container {}",
            container_name, container_id
        );

        Ok(ServerHandle::new(
            attempt_id.clone(),
            container_name.clone(),
            container_id,
            PlatformKind::LocalDocker,
            version.image(),
        )
        .with_metadata("container_name", serde_json::json!(container_name)))
    }

    async fn poll(&self, handle: &ServerHandle) -> Result<InstanceState, BackendError> {
        let inspect = match self.inspect(handle).await {
            Ok(inspect) => inspect,
            Err(BackendError::InstanceNotFound(name)) => {
                return Ok(InstanceState::Crashed {
                    reason: format!("container {} no longer exists", name),
                });
            }
            Err(e) => return Err(e),
        };

        let state = inspect.state.as_ref();
        Ok(Self::map_container_state(
            state.and_then(|s| s.status.as_ref()),
            state.and_then(|s| s.exit_code),
        ))
    }

    async fn endpoint(&self, handle: &ServerHandle) -> Result<String, BackendError> {
        let inspect = self.inspect(handle).await?;
        let port = Self::published_port(&inspect).ok_or_else(|| {
            BackendError::EndpointUnavailable(format!(
                "No host port published for {} on container {}",
                Self::rest_port_key(),
                handle.instance_name
            ))
        })?;
        Ok(format!("http://{}:{}", self.endpoint_host, port))
    }

    async fn teardown(&self, handle: &ServerHandle) -> Result<(), BackendError> {
        let container_id = &handle.resource_id;
        info!("Tearing down container {}", handle.instance_name);

        let stop_options = StopContainerOptionsBuilder::default()
            .t(STOP_GRACE_SECS)
            .build();
        match self
            .client
            .stop_container(container_id, Some(stop_options))
            .await
        {
            Ok(()) => {}
            Err(BollardError::DockerResponseServerError {
                status_code: 304 | 404,
                ..
            }) => {
                debug!("Container {} already stopped", handle.instance_name);
            }
            Err(e) => warn!("Failed to stop container gracefully: {}", e),
        }

        self.remove_container(container_id).await?;

        info!("Container {} removed", handle.instance_name);
        Ok(())
    }

    async fn health_check(&self) -> Result<HealthStatus, BackendError> {
        match self.client.ping().await {
            Ok(_) => Ok(HealthStatus::Healthy),
            Err(e) => Ok(HealthStatus::Unhealthy {
                reason: format!("Docker daemon unreachable: {}", e),
            }),
        }
    }
}
