// Infra Validator - Infrastructure Layer
// Implementaciones concretas de los puertos del dominio
// Módulos:
// - providers: Implementaciones de RuntimeBackend (Docker, Kubernetes)
// - serving: Cliente REST de TensorFlow Serving
// - example_files: ExampleSource sobre ficheros JSON por split

pub mod example_files;
pub mod providers;
pub mod serving;

pub use example_files::*;
pub use providers::*;
pub use serving::*;
