//! Mock artifact archive for testing.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::artifact::{ArchiveError, ArtifactArchive, ArtifactKind};

/// An artifact handed to the archive.
#[derive(Debug, Clone)]
pub struct StoredArtifact {
    pub local_request_id: String,
    pub kind: ArtifactKind,
    pub bytes: Vec<u8>,
}

/// In-memory ArtifactArchive that records what it was given.
#[derive(Debug, Clone, Default)]
pub struct MockArchive {
    stored: Arc<RwLock<Vec<StoredArtifact>>>,
    should_fail: Arc<RwLock<bool>>,
}

impl MockArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get everything stored so far.
    pub async fn stored(&self) -> Vec<StoredArtifact> {
        self.stored.read().await.clone()
    }

    /// Make every subsequent store fail.
    pub async fn set_fail(&self, fail: bool) {
        *self.should_fail.write().await = fail;
    }
}

#[async_trait]
impl ArtifactArchive for MockArchive {
    async fn store(
        &self,
        local_request_id: &str,
        bytes: Vec<u8>,
        kind: ArtifactKind,
    ) -> Result<(), ArchiveError> {
        if *self.should_fail.read().await {
            return Err(ArchiveError::Storage("Mock failure".to_string()));
        }
        self.stored.write().await.push(StoredArtifact {
            local_request_id: local_request_id.to_string(),
            kind,
            bytes,
        });
        Ok(())
    }
}
