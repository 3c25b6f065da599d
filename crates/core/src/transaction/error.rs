use thiserror::Error;

use super::Phase;

/// Caller misuse and lookup failures. Signalled immediately, never swallowed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransactionError {
    #[error("transaction not found: {0}")]
    NotFound(String),

    #[error("subject parameters changed for transaction {local_request_id}")]
    SubjectChanged { local_request_id: String },

    #[error("transaction {local_request_id} already finished as {phase}")]
    AlreadyTerminal {
        local_request_id: String,
        phase: Phase,
    },

    #[error("invalid transaction phase: expected {expected}, got {actual}")]
    InvalidPhase { expected: String, actual: Phase },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TransactionError::NotFound("req-1".to_string());
        assert_eq!(err.to_string(), "transaction not found: req-1");

        let err = TransactionError::AlreadyTerminal {
            local_request_id: "req-2".to_string(),
            phase: Phase::Cancelled,
        };
        assert_eq!(
            err.to_string(),
            "transaction req-2 already finished as cancelled"
        );

        let err = TransactionError::InvalidPhase {
            expected: "polling".to_string(),
            actual: Phase::Pending,
        };
        assert_eq!(
            err.to_string(),
            "invalid transaction phase: expected polling, got pending"
        );
    }
}
