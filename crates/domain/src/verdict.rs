// Verdict - Resultado final de la validación

use crate::serving_spec::BinaryVersion;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Blessing {
    Blessed,
    NotBlessed,
}

impl Blessing {
    pub fn is_blessed(&self) -> bool {
        matches!(self, Blessing::Blessed)
    }

    /// Name of the marker file written to the blessing directory.
    pub fn marker_file(&self) -> &'static str {
        match self {
            Blessing::Blessed => "INFRA_BLESSED",
            Blessing::NotBlessed => "INFRA_NOT_BLESSED",
        }
    }
}

impl fmt::Display for Blessing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Blessing::Blessed => write!(f, "BLESSED"),
            Blessing::NotBlessed => write!(f, "NOT_BLESSED"),
        }
    }
}

/// Outcome for one serving binary version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionVerdict {
    pub version: BinaryVersion,
    pub blessing: Blessing,
    pub attempts: u32,
    pub last_failure: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub blessing: Blessing,
    /// Validated model: the warmup copy when one was written, the resolved
    /// layout's version directory otherwise.
    pub model: PathBuf,
    pub has_warmup: bool,
    pub versions: Vec<VersionVerdict>,
    pub completed_at: DateTime<Utc>,
}

impl Verdict {
    /// Blessed only when every version is individually blessed.
    pub fn from_versions(model: PathBuf, versions: Vec<VersionVerdict>) -> Self {
        let blessing = if !versions.is_empty() && versions.iter().all(|v| v.blessing.is_blessed())
        {
            Blessing::Blessed
        } else {
            Blessing::NotBlessed
        };
        Self {
            blessing,
            model,
            has_warmup: false,
            versions,
            completed_at: Utc::now(),
        }
    }

    pub fn is_blessed(&self) -> bool {
        self.blessing.is_blessed()
    }
}
