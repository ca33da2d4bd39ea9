//! Blessing directory: one marker file plus `verdict.json`.

use infra_validator_domain::{Blessing, DomainError, Result, Verdict};
use std::fs;
use std::path::Path;
use tracing::info;

pub const VERDICT_FILE_NAME: &str = "verdict.json";

pub struct BlessingWriter;

impl BlessingWriter {
    pub fn write(dir: &Path, verdict: &Verdict) -> Result<()> {
        fs::create_dir_all(dir).map_err(|e| DomainError::io(dir, e))?;

        // A rerun into the same directory must not leave both markers.
        for stale in [Blessing::Blessed, Blessing::NotBlessed] {
            let marker = dir.join(stale.marker_file());
            if marker.exists() {
                fs::remove_file(&marker).map_err(|e| DomainError::io(&marker, e))?;
            }
        }

        let marker = dir.join(verdict.blessing.marker_file());
        fs::write(&marker, b"").map_err(|e| DomainError::io(&marker, e))?;

        let verdict_path = dir.join(VERDICT_FILE_NAME);
        let json = serde_json::to_vec_pretty(verdict).map_err(|e| {
            DomainError::io(&verdict_path, std::io::Error::other(e))
        })?;
        fs::write(&verdict_path, json).map_err(|e| DomainError::io(&verdict_path, e))?;

        info!("Wrote {} to {}", verdict.blessing, dir.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_marker_replaced_on_rerun() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("blessing");

        let mut verdict = Verdict::from_versions(PathBuf::from("/m"), vec![]);
        BlessingWriter::write(&dir, &verdict).unwrap();
        assert!(dir.join("INFRA_NOT_BLESSED").is_file());

        verdict.blessing = Blessing::Blessed;
        BlessingWriter::write(&dir, &verdict).unwrap();
        assert!(dir.join("INFRA_BLESSED").is_file());
        assert!(!dir.join("INFRA_NOT_BLESSED").exists());

        let written: Verdict =
            serde_json::from_slice(&fs::read(dir.join(VERDICT_FILE_NAME)).unwrap()).unwrap();
        assert_eq!(written.blessing, Blessing::Blessed);
    }
}
