//! Serving endpoint clients

pub mod tensorflow_serving;

pub use tensorflow_serving::TensorflowServingClient;
