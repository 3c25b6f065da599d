use async_trait::async_trait;

use super::{GatewayError, SubjectKey, TransactionUpdate};

/// The remote data-source service, as seen by the orchestrator.
///
/// Implementations own endpoint resolution and credentials. The data source
/// endpoint is taken from [`SubjectKey::data_source`].
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Gateway name, for logs and metrics.
    fn name(&self) -> &str;

    /// Start a new remote execution for `subject`.
    async fn trigger(&self, subject: &SubjectKey) -> Result<TransactionUpdate, GatewayError>;

    /// Check the status of an existing execution.
    async fn poll(
        &self,
        subject: &SubjectKey,
        remote_uid: &str,
    ) -> Result<TransactionUpdate, GatewayError>;

    /// Download an artifact (PDF or original files) by locator.
    async fn fetch_artifact(&self, url: &str) -> Result<Vec<u8>, GatewayError>;
}
