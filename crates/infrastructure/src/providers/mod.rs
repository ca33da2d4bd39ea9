//! Runtime Backend Implementations
//!
//! Implementations of the RuntimeBackend trait for the platforms a model
//! server can be launched on.

pub mod docker;
pub mod kubernetes;
pub mod pod_spec_factory;

pub use docker::{DockerBackend, DockerBackendBuilder};
pub use kubernetes::{KubernetesBackend, KubernetesIdentityConfig};
pub use pod_spec_factory::{OrchestratorIdentity, PodSpecFactory, PodSpecFactoryConfig};

/// TensorFlow Serving REST API port.
pub const REST_API_PORT: u16 = 8501;

/// TensorFlow Serving gRPC API port.
pub const GRPC_API_PORT: u16 = 8500;

/// Where the serving image looks for models.
pub const CONTAINER_MODEL_BASE_PATH: &str = "/models";
