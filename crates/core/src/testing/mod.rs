//! Testing utilities and mock implementations.
//!
//! Mocks for every collaborator the orchestrator talks to, so the full
//! lifecycle can be exercised without a remote service.
//!
//! # Example
//!
//! ```rust,ignore
//! use bgcheck_core::testing::{MemoryAuditSink, MockArchive, MockGateway};
//!
//! let gateway = MockGateway::new();
//! let archive = MockArchive::new();
//! let sink = MemoryAuditSink::new();
//!
//! // Script responses
//! gateway.push_trigger(&subject, TransactionUpdate::new(12).with_uid("u1")).await;
//! gateway.push_poll("u1", TransactionUpdate::new(1)).await;
//! ```

mod memory_audit_sink;
mod mock_archive;
mod mock_gateway;

pub use memory_audit_sink::MemoryAuditSink;
pub use mock_archive::{MockArchive, StoredArtifact};
pub use mock_gateway::{MockGateway, RecordedCall};

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::gateway::{SubjectKey, TransactionUpdate};

    /// A subject for the `cpf-status` data source.
    pub fn subject(tax_id: &str) -> SubjectKey {
        SubjectKey::new("cpf-status").with_param("tax_id", tax_id)
    }

    /// An in-progress response carrying `uid`.
    pub fn in_progress(uid: &str) -> TransactionUpdate {
        TransactionUpdate::new(12)
            .with_uid(uid)
            .with_message("Request being processed")
    }

    /// A successful response with the given `(source, indicator)` pairs.
    pub fn success(uid: &str, indicators: &[(&str, &str)]) -> TransactionUpdate {
        indicators.iter().fold(
            TransactionUpdate::new(1)
                .with_uid(uid)
                .with_message("Query completed"),
            |update, (source, indicator)| update.with_indicator(source, indicator),
        )
    }
}
