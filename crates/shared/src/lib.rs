// Infra Validator - Shared
// Configuración compartida por la CLI y los tests:
// - settings del proceso (entorno / .env)
// - fichero de configuración de la ejecución (JSON)

pub mod config;

pub use config::*;
