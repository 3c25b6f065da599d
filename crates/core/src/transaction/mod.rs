//! Per-transaction lifecycle.
//!
//! A [`TransactionMachine`] owns one [`TransactionState`] and is the only
//! thing allowed to mutate it. All transitions are synchronous; the
//! scheduler performs network I/O and feeds the results back in.

mod error;
mod machine;
mod types;

pub use error::TransactionError;
pub use machine::{ApplyOutcome, DiscardReason, Transition, TransactionMachine};
pub use types::{
    CompletionWarning, ErrorKind, FailureReason, Phase, TransactionHandle, TransactionState,
};
