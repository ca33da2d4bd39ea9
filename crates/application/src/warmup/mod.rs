//! Warmup Writer
//!
//! Copies the validated model version and embeds the requests that passed
//! validation at `assets.extra/tf_serving_warmup_requests`, a TFRecord file
//! of `PredictionLog` messages the server replays at startup.

pub mod messages;
mod tfrecord;

pub use messages::PredictionLog;

use infra_validator_domain::{DomainError, ModelLayout, ProbeRequest, Result};
use prost::Message;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::fs_util::replace_dir_with_copy;

pub const WARMUP_ASSETS_DIR: &str = "assets.extra";
pub const WARMUP_FILE_NAME: &str = "tf_serving_warmup_requests";

pub struct WarmupWriter;

impl WarmupWriter {
    /// Writes `<output_dir>/<model_name>/<version>/` and returns that path.
    pub fn write(
        layout: &ModelLayout,
        requests: &[ProbeRequest],
        output_dir: &Path,
    ) -> Result<PathBuf> {
        if requests.is_empty() {
            return Err(DomainError::Warmup {
                message: "no requests to record".to_string(),
            });
        }

        let target = output_dir
            .join(&layout.model_name)
            .join(layout.version.to_string());
        if target == layout.version_dir() {
            return Err(DomainError::Warmup {
                message: format!(
                    "warmup output {} would overwrite the validated model",
                    target.display()
                ),
            });
        }

        // Convert first so a bad request leaves no partial copy behind.
        let logs = requests
            .iter()
            .map(PredictionLog::from_request)
            .collect::<Result<Vec<_>>>()?;

        replace_dir_with_copy(&layout.version_dir(), &target)?;

        let assets = target.join(WARMUP_ASSETS_DIR);
        fs::create_dir_all(&assets).map_err(|e| DomainError::io(&assets, e))?;

        let trace = assets.join(WARMUP_FILE_NAME);
        let file = fs::File::create(&trace).map_err(|e| DomainError::io(&trace, e))?;
        let mut writer = BufWriter::new(file);
        for log in &logs {
            tfrecord::write_record(&mut writer, &log.encode_to_vec())
                .map_err(|e| DomainError::io(&trace, e))?;
        }
        writer.flush().map_err(|e| DomainError::io(&trace, e))?;

        info!(
            "Wrote {} warmup record(s) to {}",
            logs.len(),
            trace.display()
        );
        Ok(target)
    }

    /// Read back the warmup records of a model version directory.
    pub fn read(model_version_dir: &Path) -> Result<Vec<PredictionLog>> {
        let trace = model_version_dir
            .join(WARMUP_ASSETS_DIR)
            .join(WARMUP_FILE_NAME);
        let content = fs::read(&trace).map_err(|e| DomainError::io(&trace, e))?;
        let records = tfrecord::read_records(&content).map_err(|e| DomainError::io(&trace, e))?;

        records
            .iter()
            .map(|record| {
                PredictionLog::decode(record.as_slice()).map_err(|e| DomainError::Warmup {
                    message: format!("malformed warmup record in {}: {}", trace.display(), e),
                })
            })
            .collect()
    }
}
