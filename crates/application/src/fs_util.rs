//! Directory copy helpers shared by the layout resolver and the warmup writer.

use infra_validator_domain::{DomainError, Result};
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

/// Replace `dst` with a recursive copy of `src`.
pub fn replace_dir_with_copy(src: &Path, dst: &Path) -> Result<()> {
    if dst.exists() {
        fs::remove_dir_all(dst).map_err(|e| DomainError::io(dst, e))?;
    }
    copy_dir_all(src, dst)
}

/// Recursively copy the contents of `src` into `dst`, creating `dst`.
pub fn copy_dir_all(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst).map_err(|e| DomainError::io(dst, e))?;

    for entry in WalkDir::new(src).min_depth(1).follow_links(true) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(src).to_path_buf();
            let io = e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("filesystem loop"));
            DomainError::io(path, io)
        })?;

        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| DomainError::ModelLayout {
                message: format!("{} escapes {}: {}", entry.path().display(), src.display(), e),
            })?;
        let target = dst.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| DomainError::io(&target, e))?;
        } else {
            fs::copy(entry.path(), &target).map_err(|e| DomainError::io(entry.path(), e))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_copy_nested_tree_and_replace() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir_all(src.join("variables")).unwrap();
        fs::write(src.join("saved_model.pb"), b"graph").unwrap();
        fs::write(src.join("variables/variables.index"), b"idx").unwrap();

        let dst = tmp.path().join("dst");
        fs::create_dir_all(&dst).unwrap();
        fs::write(dst.join("stale"), b"old").unwrap();

        replace_dir_with_copy(&src, &dst).unwrap();

        assert_eq!(fs::read(dst.join("saved_model.pb")).unwrap(), b"graph");
        assert_eq!(fs::read(dst.join("variables/variables.index")).unwrap(), b"idx");
        assert!(!dst.join("stale").exists());
    }
}
