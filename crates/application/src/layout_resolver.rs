//! Serving Layout Resolver
//!
//! TensorFlow Serving loads models from `<base>/<model_name>/<version>/`.
//! An artifact already in that shape is used in place; anything else is
//! staged as version 1 under the staging directory.

use infra_validator_domain::{DomainError, ModelArtifact, ModelLayout, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::fs_util::replace_dir_with_copy;

/// Version given to staged copies. Constant so re-resolution is idempotent.
pub const STAGED_MODEL_VERSION: u64 = 1;

const SAVED_MODEL_FILES: &[&str] = &["saved_model.pb", "saved_model.pbtxt"];

#[derive(Debug, Clone)]
pub struct ServingLayoutResolver {
    staging_dir: PathBuf,
}

impl ServingLayoutResolver {
    pub fn new(staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
        }
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    pub fn resolve(&self, artifact: &ModelArtifact, model_name: &str) -> Result<ModelLayout> {
        let serving_dir = artifact.serving_dir();
        if !serving_dir.is_dir() {
            return Err(DomainError::ModelLayout {
                message: format!("model directory {} does not exist", serving_dir.display()),
            });
        }

        if let Some(layout) = Self::existing_layout(&serving_dir, model_name) {
            info!(
                "Model at {} already follows the serving layout, using it in place",
                serving_dir.display()
            );
            return Ok(layout);
        }

        if !has_saved_model(&serving_dir) {
            warn!(
                "No saved_model.pb found in {}; the server will likely fail to load it",
                serving_dir.display()
            );
        }

        let layout = ModelLayout {
            base_path: self.staging_dir.clone(),
            model_name: model_name.to_string(),
            version: STAGED_MODEL_VERSION,
            copied: true,
        };
        let target = layout.version_dir();
        debug!("Staging {} to {}", serving_dir.display(), target.display());
        replace_dir_with_copy(&serving_dir, &target)?;

        info!("Model staged at {}", target.display());
        Ok(layout)
    }

    /// `<base>/<model_name>/<integer>/saved_model.pb[txt]`
    fn existing_layout(serving_dir: &Path, model_name: &str) -> Option<ModelLayout> {
        let version: u64 = serving_dir.file_name()?.to_str()?.parse().ok()?;
        let model_dir = serving_dir.parent()?;
        if model_dir.file_name()?.to_str()? != model_name {
            return None;
        }
        let base_path = model_dir.parent()?;
        if !has_saved_model(serving_dir) {
            return None;
        }
        Some(ModelLayout {
            base_path: base_path.to_path_buf(),
            model_name: model_name.to_string(),
            version,
            copied: false,
        })
    }
}

fn has_saved_model(dir: &Path) -> bool {
    SAVED_MODEL_FILES.iter().any(|f| dir.join(f).is_file())
}
