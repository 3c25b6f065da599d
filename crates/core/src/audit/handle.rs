use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;

use super::AuditRecord;
use crate::gateway::TransactionUpdate;
use crate::metrics;

/// Handle for handing updates to the audit writer
///
/// This is cheaply cloneable and can be shared across tasks.
/// Records go through a bounded channel to be written by the AuditWriter.
#[derive(Clone)]
pub struct AuditHandle {
    tx: mpsc::Sender<AuditRecord>,
    dropped: Arc<AtomicU64>,
}

impl AuditHandle {
    /// Create a new audit handle from a channel sender
    pub fn new(tx: mpsc::Sender<AuditRecord>) -> Self {
        Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Hand an update to the audit writer without blocking
    ///
    /// Returns true if the record was buffered. A full or closed channel is
    /// logged at error level and counted; the caller is never failed.
    pub fn record(&self, local_request_id: &str, update: &TransactionUpdate) -> bool {
        let record = AuditRecord {
            received_at: Utc::now(),
            local_request_id: local_request_id.to_string(),
            update: update.clone(),
        };
        match self.tx.try_send(record) {
            Ok(()) => true,
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::AUDIT_RECORDS_DROPPED.inc();
                tracing::error!(
                    local_request_id,
                    code = update.code,
                    "Audit record lost: {}",
                    e
                );
                false
            }
        }
    }

    /// Records lost through this handle and its clones.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
