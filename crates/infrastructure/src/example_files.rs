//! File-backed example source
//!
//! Layout: `<root>/Split-<name>/*.json[l]`, one JSON object per line.

use infra_validator_domain::{DomainError, Example, ExampleSource, Result};
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::debug;

const SPLIT_DIR_PREFIX: &str = "Split-";
const EXAMPLE_EXTENSIONS: &[&str] = &["json", "jsonl"];

#[derive(Debug, Clone)]
pub struct FileExampleSource {
    root: PathBuf,
}

impl FileExampleSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn split_dir(&self, split: &str) -> PathBuf {
        self.root.join(format!("{}{}", SPLIT_DIR_PREFIX, split))
    }

    /// Example files of a split in sorted order.
    fn example_files(&self, split_dir: &Path) -> Result<Vec<PathBuf>> {
        let entries = fs::read_dir(split_dir).map_err(|e| DomainError::io(split_dir, e))?;

        let mut files = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| DomainError::io(split_dir, e))?.path();
            let is_example = path.is_file()
                && path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| EXAMPLE_EXTENSIONS.contains(&ext));
            if is_example {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    fn read_file(path: &Path, limit: usize, out: &mut Vec<Example>) -> Result<()> {
        let file = fs::File::open(path).map_err(|e| DomainError::io(path, e))?;

        for (index, line) in BufReader::new(file).lines().enumerate() {
            if out.len() >= limit {
                break;
            }
            let line = line.map_err(|e| DomainError::io(path, e))?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let example: Example =
                serde_json::from_str(line).map_err(|e| DomainError::ExamplesSource {
                    message: format!("{}:{}: {}", path.display(), index + 1, e),
                })?;
            if !example.is_object() {
                return Err(DomainError::ExamplesSource {
                    message: format!(
                        "{}:{}: expected a JSON object per line",
                        path.display(),
                        index + 1
                    ),
                });
            }
            out.push(example);
        }
        Ok(())
    }
}

impl ExampleSource for FileExampleSource {
    fn split_names(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.root).map_err(|e| DomainError::ExamplesSource {
            message: format!("Cannot read examples at {}: {}", self.root.display(), e),
        })?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| DomainError::io(&self.root, e))?;
            if !entry.path().is_dir() {
                continue;
            }
            if let Some(split) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.strip_prefix(SPLIT_DIR_PREFIX))
                .filter(|split| !split.is_empty())
            {
                names.push(split.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn read_examples(&self, split: &str, limit: usize) -> Result<Vec<Example>> {
        let split_dir = self.split_dir(split);
        if !split_dir.is_dir() {
            return Err(DomainError::SplitNotFound {
                split: split.to_string(),
                available: self.split_names()?,
            });
        }

        let mut examples = Vec::new();
        for file in self.example_files(&split_dir)? {
            if examples.len() >= limit {
                break;
            }
            Self::read_file(&file, limit, &mut examples)?;
        }

        debug!(
            "Read {} example(s) from split {} at {}",
            examples.len(),
            split,
            split_dir.display()
        );
        Ok(examples)
    }
}
