//! Artifact fetcher.

use std::sync::Arc;

use tracing::{info, warn};

use crate::gateway::{RemoteGateway, TransactionUpdate};
use crate::metrics;
use crate::scheduler::DispatchBudget;
use crate::transaction::CompletionWarning;

use super::{ArtifactArchive, ArtifactKind};

/// Downloads a successful transaction's artifacts and archives them.
#[derive(Clone)]
pub struct ArtifactFetcher {
    gateway: Arc<dyn RemoteGateway>,
    archive: Arc<dyn ArtifactArchive>,
}

impl ArtifactFetcher {
    pub fn new(gateway: Arc<dyn RemoteGateway>, archive: Arc<dyn ArtifactArchive>) -> Self {
        Self { gateway, archive }
    }

    /// Locators to retrieve for `update`, in fetch order.
    pub fn targets(update: &TransactionUpdate) -> Vec<(ArtifactKind, String)> {
        if !update.has_pdf {
            return Vec::new();
        }
        let mut targets = Vec::with_capacity(2);
        match &update.pdf_url {
            Some(url) => targets.push((ArtifactKind::Pdf, url.clone())),
            // has_pdf without a locator still counts as a failed PDF fetch.
            None => targets.push((ArtifactKind::Pdf, String::new())),
        }
        if let Some(url) = &update.original_files_url {
            targets.push((ArtifactKind::OriginalFiles, url.clone()));
        }
        targets
    }

    /// Fetch and archive every artifact of `update`.
    ///
    /// Artifacts are fetched concurrently, each under its own dispatch permit.
    /// Returns one warning per artifact that could not be fetched or stored;
    /// an empty vector means everything was archived.
    pub async fn fetch_all(
        &self,
        local_request_id: &str,
        update: &TransactionUpdate,
        budget: &DispatchBudget,
    ) -> Vec<CompletionWarning> {
        let fetches = Self::targets(update).into_iter().map(|(kind, url)| async move {
            let result = self.fetch_one(local_request_id, kind, &url, budget).await;
            (kind, result)
        });
        let results = futures::future::join_all(fetches).await;

        let mut warnings = Vec::new();
        for (kind, result) in results {
            let label = if result.is_ok() { "stored" } else { "failed" };
            metrics::ARTIFACT_FETCHES
                .with_label_values(&[kind.as_str(), label])
                .inc();

            match result {
                Ok(size) => info!(
                    local_request_id,
                    kind = kind.as_str(),
                    bytes = size,
                    "Archived artifact"
                ),
                Err(error) => {
                    warn!(
                        local_request_id,
                        kind = kind.as_str(),
                        "Artifact fetch failed, result kept: {}",
                        error
                    );
                    warnings.push(CompletionWarning::ArtifactFetchFailed { kind, error });
                }
            }
        }

        warnings
    }

    async fn fetch_one(
        &self,
        local_request_id: &str,
        kind: ArtifactKind,
        url: &str,
        budget: &DispatchBudget,
    ) -> Result<usize, String> {
        if url.is_empty() {
            return Err("no artifact locator in response".to_string());
        }

        let bytes = {
            let _permit = budget
                .acquire()
                .await
                .ok_or_else(|| "dispatch budget closed".to_string())?;
            self.gateway
                .fetch_artifact(url)
                .await
                .map_err(|e| e.to_string())?
        };

        let size = bytes.len();
        self.archive
            .store(local_request_id, bytes, kind)
            .await
            .map_err(|e| e.to_string())?;
        Ok(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockArchive, MockGateway};

    fn fetcher(gateway: &Arc<MockGateway>, archive: &Arc<MockArchive>) -> ArtifactFetcher {
        ArtifactFetcher::new(
            Arc::clone(gateway) as Arc<dyn RemoteGateway>,
            Arc::clone(archive) as Arc<dyn ArtifactArchive>,
        )
    }

    #[test]
    fn test_targets() {
        let none = TransactionUpdate::new(1);
        assert!(ArtifactFetcher::targets(&none).is_empty());

        let both = TransactionUpdate::new(1)
            .with_pdf("https://f/a.pdf")
            .with_original_files("https://f/a.zip");
        let targets = ArtifactFetcher::targets(&both);
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].0, ArtifactKind::Pdf);
        assert_eq!(targets[1].0, ArtifactKind::OriginalFiles);
    }

    #[tokio::test]
    async fn test_fetch_all_archives_artifacts() {
        let gateway = Arc::new(MockGateway::new());
        gateway
            .set_artifact("https://f/a.pdf", b"%PDF-1.7".to_vec())
            .await;
        let archive = Arc::new(MockArchive::new());
        let budget = DispatchBudget::new(2, 0);

        let update = TransactionUpdate::new(1).with_pdf("https://f/a.pdf");
        let warnings = fetcher(&gateway, &archive)
            .fetch_all("req-1", &update, &budget)
            .await;

        assert!(warnings.is_empty());
        let stored = archive.stored().await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].local_request_id, "req-1");
        assert_eq!(stored[0].kind, ArtifactKind::Pdf);
        assert_eq!(stored[0].bytes, b"%PDF-1.7".to_vec());
    }

    #[tokio::test]
    async fn test_fetch_failure_becomes_warning() {
        let gateway = Arc::new(MockGateway::new());
        let archive = Arc::new(MockArchive::new());
        let budget = DispatchBudget::new(2, 0);

        let update = TransactionUpdate::new(1).with_pdf("https://f/missing.pdf");
        let warnings = fetcher(&gateway, &archive)
            .fetch_all("req-1", &update, &budget)
            .await;

        assert_eq!(warnings.len(), 1);
        assert!(matches!(
            warnings[0],
            CompletionWarning::ArtifactFetchFailed {
                kind: ArtifactKind::Pdf,
                ..
            }
        ));
        assert!(archive.stored().await.is_empty());
    }

    #[tokio::test]
    async fn test_archive_failure_becomes_warning() {
        let gateway = Arc::new(MockGateway::new());
        gateway.set_artifact("https://f/a.pdf", vec![1, 2, 3]).await;
        let archive = Arc::new(MockArchive::new());
        archive.set_fail(true).await;
        let budget = DispatchBudget::new(2, 0);

        let update = TransactionUpdate::new(1).with_pdf("https://f/a.pdf");
        let warnings = fetcher(&gateway, &archive)
            .fetch_all("req-1", &update, &budget)
            .await;
        assert_eq!(warnings.len(), 1);
    }
}
