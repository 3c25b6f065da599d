use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of evidence attached to a completed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Pdf,
    OriginalFiles,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::OriginalFiles => "original_files",
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ArchiveError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Artifact rejected: {0}")]
    Rejected(String),
}
