use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::gateway::TransactionUpdate;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// One audit entry: a raw update and the transaction it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// When the orchestrator received the update.
    pub received_at: DateTime<Utc>,
    pub local_request_id: String,
    pub update: TransactionUpdate,
}

/// Destination for audit records (compliance log, database, ...).
pub trait AuditSink: Send + Sync {
    fn record(&self, record: &AuditRecord) -> Result<(), AuditError>;
}

/// Sink that writes each record as a structured log event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let update = serde_json::to_string(&record.update)
            .map_err(|e| AuditError::Serialization(e.to_string()))?;
        tracing::info!(
            target: "bgcheck::audit",
            local_request_id = %record.local_request_id,
            received_at = %record.received_at,
            code = record.update.code,
            update = %update,
            "audit record"
        );
        Ok(())
    }
}
