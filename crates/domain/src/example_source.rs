// ExampleSource - Origen de ejemplos para construir peticiones

use crate::shared_kernel::Result;

/// A single example: a JSON object of feature name to value.
pub type Example = serde_json::Value;

/// Example data split by name (train, eval, ...).
pub trait ExampleSource: Send + Sync {
    /// Available split names in a deterministic order.
    fn split_names(&self) -> Result<Vec<String>>;

    /// Read at most `limit` examples from `split`.
    fn read_examples(&self, split: &str, limit: usize) -> Result<Vec<Example>>;
}
