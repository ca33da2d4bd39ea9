// Infra Validator - Domain Layer
// Módulos:
// - shared_kernel: IDs y errores compartidos
// - serving_spec: ServingSpec, ValidationSpec, configuración de plataforma
// - request_spec: RequestSpec y ProbeRequest
// - model: ModelArtifact y ModelLayout
// - runtime_backend: trait RuntimeBackend, ServerHandle, BackendError
// - serving_client: trait ServingClient, ModelState, ProbeError
// - example_source: trait ExampleSource
// - verdict: Blessing y Verdict

pub mod example_source;
pub mod model;
pub mod request_spec;
pub mod runtime_backend;
pub mod serving_client;
pub mod serving_spec;
pub mod shared_kernel;
pub mod verdict;

pub use example_source::*;
pub use model::*;
pub use request_spec::*;
pub use runtime_backend::*;
pub use serving_client::*;
pub use serving_spec::*;
pub use shared_kernel::*;
pub use verdict::*;
