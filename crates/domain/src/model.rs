// Model - Artefacto de modelo y layout de serving

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Subdirectory some exporters use for the servable copy of a model.
pub const SERVING_MODEL_SUBDIR: &str = "Format-Serving";

/// Reference to a trained model on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub uri: PathBuf,
}

impl ModelArtifact {
    pub fn new(uri: impl Into<PathBuf>) -> Self {
        Self { uri: uri.into() }
    }

    /// Directory holding the servable model: `Format-Serving/` when present,
    /// the artifact root otherwise.
    pub fn serving_dir(&self) -> PathBuf {
        let nested = self.uri.join(SERVING_MODEL_SUBDIR);
        if nested.is_dir() { nested } else { self.uri.clone() }
    }
}

/// Model arranged as `<base_path>/<model_name>/<version>/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelLayout {
    pub base_path: PathBuf,
    pub model_name: String,
    pub version: u64,
    /// True when the layout points at a staged copy rather than the artifact.
    pub copied: bool,
}

impl ModelLayout {
    pub fn model_dir(&self) -> PathBuf {
        self.base_path.join(&self.model_name)
    }

    pub fn version_dir(&self) -> PathBuf {
        self.model_dir().join(self.version.to_string())
    }

    pub fn is_within(&self, root: &Path) -> bool {
        self.base_path.starts_with(root)
    }
}
