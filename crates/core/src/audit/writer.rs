use std::sync::Arc;

use tokio::sync::mpsc;

use super::{AuditHandle, AuditRecord, AuditSink};

/// Background task that receives audit records and forwards them to the sink
pub struct AuditWriter {
    rx: mpsc::Receiver<AuditRecord>,
    sink: Arc<dyn AuditSink>,
}

impl AuditWriter {
    /// Create a new audit writer
    pub fn new(rx: mpsc::Receiver<AuditRecord>, sink: Arc<dyn AuditSink>) -> Self {
        Self { rx, sink }
    }

    /// Run the writer, consuming records until every handle is dropped
    ///
    /// This should be spawned as a background task.
    pub async fn run(mut self) {
        tracing::info!("Audit writer started");

        while let Some(record) = self.rx.recv().await {
            if let Err(e) = self.sink.record(&record) {
                tracing::error!(
                    local_request_id = %record.local_request_id,
                    code = record.update.code,
                    "Failed to write audit record: {}",
                    e
                );
            }
        }

        tracing::info!("Audit writer shutting down");
    }
}

/// Create a complete audit pipeline
///
/// Returns:
/// - `AuditHandle` - for handing off records (clone this to share across tasks)
/// - `AuditWriter` - spawn this as a background task with `tokio::spawn(writer.run())`
///
/// # Arguments
/// * `sink` - The sink receiving records
/// * `buffer_size` - Size of the channel buffer (records are dropped, and counted, when full)
pub fn create_audit_pipeline(
    sink: Arc<dyn AuditSink>,
    buffer_size: usize,
) -> (AuditHandle, AuditWriter) {
    let (tx, rx) = mpsc::channel(buffer_size.max(1));
    let handle = AuditHandle::new(tx);
    let writer = AuditWriter::new(rx, sink);
    (handle, writer)
}
