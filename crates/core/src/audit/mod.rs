//! Compliance audit trail.
//!
//! Every raw [`TransactionUpdate`](crate::gateway::TransactionUpdate) is
//! handed to an [`AuditSink`] through a bounded buffer so that a slow sink
//! never stalls the polling path. Records that cannot be buffered are
//! counted and logged, never dropped silently.

mod handle;
mod sink;
mod writer;

pub use handle::*;
pub use sink::*;
pub use writer::*;
