//! Types for the orchestrator.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::gateway::TransactionUpdate;
use crate::risk::RiskVerdict;
use crate::transaction::{
    CompletionWarning, FailureReason, Phase, TransactionError, TransactionHandle,
    TransactionState,
};

/// Errors returned by the caller-facing API.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The orchestrator has not been started, or has been stopped.
    #[error("orchestrator is not running")]
    NotRunning,

    /// Lookup failure or caller misuse on a specific transaction.
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    /// The request itself is unusable.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Published once per transaction when it reaches a terminal phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionEvent {
    pub handle: TransactionHandle,
    pub phase: Phase,
    /// Last update the transaction accepted, if any arrived.
    pub final_update: Option<TransactionUpdate>,
    /// Only present for `Succeeded` with recognised indicators.
    pub verdict: Option<RiskVerdict>,
    pub failure: Option<FailureReason>,
    pub attempt_count: u32,
    pub artifacts_fetched: bool,
    pub warnings: Vec<CompletionWarning>,
}

impl CompletionEvent {
    pub fn from_state(state: &TransactionState) -> Self {
        Self {
            handle: state.handle.clone(),
            phase: state.phase,
            final_update: state.last_update.clone(),
            verdict: state.verdict(),
            failure: state.failure.clone(),
            attempt_count: state.attempt_count,
            artifacts_fetched: state.artifacts_fetched,
            warnings: state.warnings.clone(),
        }
    }

    pub fn local_request_id(&self) -> &str {
        &self.handle.local_request_id
    }
}

/// Current status of the orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    /// Whether the orchestrator is running.
    pub running: bool,
    /// Transactions tracked, terminal ones included.
    pub total: usize,
    pub pending: usize,
    pub triggering: usize,
    pub polling: usize,
    pub failed_retryable: usize,
    pub succeeded: usize,
    pub failed_terminal: usize,
    pub expired: usize,
    pub cancelled: usize,
    /// Network operations currently holding a dispatch permit.
    pub in_flight: usize,
    /// Audit records lost since start.
    pub audit_dropped: u64,
}

impl OrchestratorStatus {
    pub(crate) fn count(&mut self, phase: Phase) {
        self.total += 1;
        let slot = match phase {
            Phase::Pending => &mut self.pending,
            Phase::Triggering => &mut self.triggering,
            Phase::Polling => &mut self.polling,
            Phase::FailedRetryable => &mut self.failed_retryable,
            Phase::Succeeded => &mut self.succeeded,
            Phase::FailedTerminal => &mut self.failed_terminal,
            Phase::Expired => &mut self.expired,
            Phase::Cancelled => &mut self.cancelled,
        };
        *slot += 1;
    }

    /// Transactions not yet in a terminal phase.
    pub fn active(&self) -> usize {
        self.pending + self.triggering + self.polling + self.failed_retryable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::SubjectKey;
    use chrono::Utc;

    #[test]
    fn test_orchestrator_status_default() {
        let status = OrchestratorStatus::default();
        assert!(!status.running);
        assert_eq!(status.total, 0);
        assert_eq!(status.active(), 0);
    }

    #[test]
    fn test_status_counts_phases() {
        let mut status = OrchestratorStatus::default();
        status.count(Phase::Polling);
        status.count(Phase::Polling);
        status.count(Phase::Succeeded);
        assert_eq!(status.total, 3);
        assert_eq!(status.polling, 2);
        assert_eq!(status.active(), 2);
    }

    #[test]
    fn test_completion_event_carries_verdict_for_success_only() {
        let now = Utc::now();
        let mut state = TransactionState {
            handle: TransactionHandle::new("req-1", SubjectKey::new("cpf-status")),
            phase: Phase::Succeeded,
            attempt_count: 1,
            last_update: Some(TransactionUpdate::new(1).with_indicator("a", "amber")),
            created_at: now,
            deadline_at: now,
            updated_at: now,
            artifacts_fetched: false,
            failure: None,
            warnings: Vec::new(),
        };

        let event = CompletionEvent::from_state(&state);
        assert_eq!(event.verdict, Some(RiskVerdict::Amber));
        assert_eq!(event.local_request_id(), "req-1");

        state.phase = Phase::Expired;
        assert_eq!(CompletionEvent::from_state(&state).verdict, None);
    }

    #[test]
    fn test_error_display() {
        let err = OrchestratorError::from(TransactionError::NotFound("req-9".to_string()));
        assert_eq!(err.to_string(), "transaction not found: req-9");

        let err = OrchestratorError::InvalidRequest("empty data source".to_string());
        assert_eq!(err.to_string(), "invalid request: empty data source");
    }
}
