// Infra Validator - Application Layer
// Casos de uso de validación de infraestructura
// Módulos:
// - layout_resolver: adapta el modelo al layout <name>/<version>
// - request_builder: construye las peticiones de prueba
// - state_machine: ciclo de vida de un intento
// - orchestrator: reintentos, versiones concurrentes y veredicto
// - warmup / blessing: artefactos de salida

mod fs_util;

pub mod blessing;
pub mod layout_resolver;
pub mod orchestrator;
pub mod request_builder;
pub mod state_machine;
pub mod warmup;

pub use blessing::*;
pub use layout_resolver::*;
pub use orchestrator::*;
pub use request_builder::*;
pub use state_machine::*;
pub use warmup::*;

pub use tokio_util::sync::CancellationToken;
