//! In-memory audit sink for testing.

use std::sync::Mutex;

use crate::audit::{AuditError, AuditRecord, AuditSink};

/// AuditSink that keeps every record in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all records received so far.
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Codes of the records for one transaction, in arrival order.
    pub fn codes_for(&self, local_request_id: &str) -> Vec<i64> {
        self.records()
            .iter()
            .filter(|r| r.local_request_id == local_request_id)
            .map(|r| r.update.code)
            .collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, record: &AuditRecord) -> Result<(), AuditError> {
        self.records
            .lock()
            .map_err(|e| AuditError::Storage(e.to_string()))?
            .push(record.clone());
        Ok(())
    }
}
