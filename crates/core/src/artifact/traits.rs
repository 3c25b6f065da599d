use async_trait::async_trait;

use super::{ArchiveError, ArtifactKind};

/// Receives artifact bytes for long-term storage.
#[async_trait]
pub trait ArtifactArchive: Send + Sync {
    async fn store(
        &self,
        local_request_id: &str,
        bytes: Vec<u8>,
        kind: ArtifactKind,
    ) -> Result<(), ArchiveError>;
}
