//! Transaction state machine.
//!
//! ```text
//! Pending ──trigger──▶ Triggering ──12 + uid──▶ Polling ──1/2──▶ Succeeded
//!    ▲                     │                       │
//!    └──────9/10───────────┴───────9/10────────────┘   (new trigger, new uid)
//!
//! Triggering / Polling ──5/255/unknown──▶ FailedTerminal
//! Triggering ──transport exhausted──▶ FailedRetryable ──trigger──▶ Triggering
//! any non-terminal ──deadline──▶ Expired
//! any non-terminal ──cancel──▶ Cancelled
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classifier::OutcomeClass;
use crate::gateway::{GatewayError, SubjectKey, TransactionUpdate};

use super::{
    CompletionWarning, FailureReason, Phase, TransactionError, TransactionHandle,
    TransactionState,
};

/// A phase change (or an in-place refresh, when `from == to`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: Phase,
    pub to: Phase,
    /// Outcome of the update that caused the transition, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<OutcomeClass>,
}

impl Transition {
    pub fn is_terminal(&self) -> bool {
        self.to.is_terminal()
    }
}

/// Why an update was ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiscardReason {
    /// No response is expected in this phase (e.g. cancelled, finished).
    NotAwaitingResponse { phase: Phase },
    /// The update belongs to a previous remote execution.
    StaleUid {
        expected: Option<String>,
        got: Option<String>,
    },
}

/// Result of feeding an update to the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Moved(Transition),
    /// Same update as the last one applied; nothing changed.
    Duplicate,
    Discarded(DiscardReason),
}

/// Owns and mutates one [`TransactionState`].
#[derive(Debug, Clone)]
pub struct TransactionMachine {
    state: TransactionState,
    max_trigger_attempts: u32,
    artifact_fetch_started: bool,
}

impl TransactionMachine {
    pub fn new(
        handle: TransactionHandle,
        created_at: DateTime<Utc>,
        deadline_at: DateTime<Utc>,
        max_trigger_attempts: u32,
    ) -> Self {
        Self {
            state: TransactionState {
                handle,
                phase: Phase::Pending,
                attempt_count: 0,
                last_update: None,
                created_at,
                deadline_at,
                updated_at: created_at,
                artifacts_fetched: false,
                failure: None,
                warnings: Vec::new(),
            },
            max_trigger_attempts: max_trigger_attempts.max(1),
            artifact_fetch_started: false,
        }
    }

    pub fn state(&self) -> &TransactionState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    pub fn local_request_id(&self) -> &str {
        &self.state.handle.local_request_id
    }

    pub fn subject(&self) -> &SubjectKey {
        &self.state.handle.subject
    }

    pub fn remote_uid(&self) -> Option<&str> {
        self.state.handle.remote_uid.as_deref()
    }

    /// Re-submissions must carry the subject the transaction was created with.
    pub fn ensure_subject(&self, subject: &SubjectKey) -> Result<(), TransactionError> {
        if &self.state.handle.subject == subject {
            Ok(())
        } else {
            Err(TransactionError::SubjectChanged {
                local_request_id: self.state.handle.local_request_id.clone(),
            })
        }
    }

    /// Record that a trigger is being sent.
    pub fn begin_trigger(&mut self) -> Result<Transition, TransactionError> {
        let from = self.state.phase;
        match from {
            Phase::Pending | Phase::FailedRetryable => {
                self.state.attempt_count += 1;
                Ok(self.move_to(Phase::Triggering, None))
            }
            phase if phase.is_terminal() => Err(self.already_terminal()),
            actual => Err(TransactionError::InvalidPhase {
                expected: "pending or failed_retryable".to_string(),
                actual,
            }),
        }
    }

    /// Apply one remote response.
    ///
    /// The meaning of the update depends on the phase: in `Triggering` it is
    /// the trigger response, in `Polling` a poll response. Anything else is
    /// discarded.
    pub fn apply_update(&mut self, update: TransactionUpdate) -> ApplyOutcome {
        // A trigger response answers a fresh request, so it is never a replay
        // of the previous attempt's last update.
        if self.state.phase != Phase::Triggering && self.state.last_update.as_ref() == Some(&update)
        {
            return ApplyOutcome::Duplicate;
        }

        let outcome = update.outcome();
        let transition = match self.state.phase {
            Phase::Triggering => self.apply_trigger_response(outcome, &update),
            Phase::Polling => {
                if update.uid.is_some() && update.uid.as_deref() != self.remote_uid() {
                    return ApplyOutcome::Discarded(DiscardReason::StaleUid {
                        expected: self.state.handle.remote_uid.clone(),
                        got: update.uid,
                    });
                }
                self.apply_poll_response(outcome, &update)
            }
            phase => {
                return ApplyOutcome::Discarded(DiscardReason::NotAwaitingResponse { phase });
            }
        };

        self.state.last_update = Some(update);
        ApplyOutcome::Moved(transition)
    }

    /// A trigger response that already reports success moves `Triggering`
    /// straight to `Succeeded`, as if one poll had returned it.
    fn apply_trigger_response(
        &mut self,
        outcome: OutcomeClass,
        update: &TransactionUpdate,
    ) -> Transition {
        match outcome {
            OutcomeClass::InProgress => match &update.uid {
                Some(uid) => {
                    self.state.handle.remote_uid = Some(uid.clone());
                    self.move_to(Phase::Polling, Some(outcome))
                }
                None => self.fail(FailureReason::MissingRemoteUid, Some(outcome)),
            },
            OutcomeClass::Success | OutcomeClass::SuccessWithRemarks => {
                if update.uid.is_some() {
                    self.state.handle.remote_uid = update.uid.clone();
                }
                self.move_to(Phase::Succeeded, Some(outcome))
            }
            OutcomeClass::RetryableTimeout | OutcomeClass::RetryableAttemptsExceeded => {
                self.retry_or_exhaust(outcome)
            }
            _ => self.fail(remote_failure(outcome, update), Some(outcome)),
        }
    }

    fn apply_poll_response(
        &mut self,
        outcome: OutcomeClass,
        update: &TransactionUpdate,
    ) -> Transition {
        match outcome {
            OutcomeClass::InProgress => self.move_to(Phase::Polling, Some(outcome)),
            OutcomeClass::Success | OutcomeClass::SuccessWithRemarks => {
                self.move_to(Phase::Succeeded, Some(outcome))
            }
            OutcomeClass::RetryableTimeout | OutcomeClass::RetryableAttemptsExceeded => {
                self.retry_or_exhaust(outcome)
            }
            _ => self.fail(remote_failure(outcome, update), Some(outcome)),
        }
    }

    /// Back to `Pending` for a fresh trigger, unless the trigger budget is spent.
    fn retry_or_exhaust(&mut self, outcome: OutcomeClass) -> Transition {
        if self.state.attempt_count >= self.max_trigger_attempts {
            return self.fail(
                FailureReason::AttemptsExhausted {
                    attempts: self.state.attempt_count,
                },
                Some(outcome),
            );
        }
        // The old UID will make no further progress.
        self.state.handle.remote_uid = None;
        self.move_to(Phase::Pending, Some(outcome))
    }

    /// Record that the gateway gave up on an operation.
    ///
    /// Returns `None` when the phase is unchanged (a poll will simply be retried later).
    pub fn record_transport_failure(&mut self, error: &GatewayError) -> Option<Transition> {
        match self.state.phase {
            Phase::Triggering | Phase::Polling if !error.is_transient() => Some(self.fail(
                FailureReason::GatewayRejected {
                    detail: error.to_string(),
                },
                None,
            )),
            Phase::Triggering => {
                if self.state.attempt_count >= self.max_trigger_attempts {
                    Some(self.fail(
                        FailureReason::AttemptsExhausted {
                            attempts: self.state.attempt_count,
                        },
                        None,
                    ))
                } else {
                    Some(self.move_to(Phase::FailedRetryable, None))
                }
            }
            _ => None,
        }
    }

    /// Move to `Expired` if the deadline has passed.
    pub fn expire_if_due(&mut self, now: DateTime<Utc>) -> Option<Transition> {
        if self.state.phase.is_terminal() || now < self.state.deadline_at {
            return None;
        }
        self.state.failure = Some(FailureReason::DeadlineExceeded);
        Some(self.move_to(Phase::Expired, None))
    }

    pub fn cancel(&mut self) -> Result<Transition, TransactionError> {
        if self.state.phase.is_terminal() {
            return Err(self.already_terminal());
        }
        Ok(self.move_to(Phase::Cancelled, None))
    }

    /// Whether the successful result still has artifacts to retrieve.
    pub fn needs_artifact_fetch(&self) -> bool {
        self.state.phase == Phase::Succeeded
            && !self.artifact_fetch_started
            && !self.state.artifacts_fetched
            && self
                .state
                .last_update
                .as_ref()
                .map(|u| u.has_pdf)
                .unwrap_or(false)
    }

    /// Claim the one-and-only artifact fetch. Returns false if already claimed.
    pub fn begin_artifact_fetch(&mut self) -> bool {
        if !self.needs_artifact_fetch() {
            return false;
        }
        self.artifact_fetch_started = true;
        true
    }

    /// Record the artifact step's result. The phase is never changed.
    pub fn finish_artifact_fetch(&mut self, failures: Vec<CompletionWarning>) {
        self.state.artifacts_fetched = failures.is_empty();
        self.state.warnings.extend(failures);
        self.state.updated_at = Utc::now();
    }

    pub fn add_warning(&mut self, warning: CompletionWarning) {
        self.state.warnings.push(warning);
    }

    fn fail(&mut self, reason: FailureReason, outcome: Option<OutcomeClass>) -> Transition {
        self.state.failure = Some(reason);
        self.move_to(Phase::FailedTerminal, outcome)
    }

    fn move_to(&mut self, to: Phase, outcome: Option<OutcomeClass>) -> Transition {
        let from = self.state.phase;
        self.state.phase = to;
        self.state.updated_at = Utc::now();
        Transition { from, to, outcome }
    }

    fn already_terminal(&self) -> TransactionError {
        TransactionError::AlreadyTerminal {
            local_request_id: self.state.handle.local_request_id.clone(),
            phase: self.state.phase,
        }
    }
}

fn remote_failure(outcome: OutcomeClass, update: &TransactionUpdate) -> FailureReason {
    if outcome == OutcomeClass::SystemError {
        FailureReason::SystemError {
            code: update.code,
            message: update.message.clone(),
        }
    } else {
        FailureReason::RemoteFailure {
            outcome,
            code: update.code,
            message: update.message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactKind;
    use chrono::Duration;

    fn machine(max_attempts: u32) -> TransactionMachine {
        let subject = SubjectKey::new("cpf-status").with_param("tax_id", "123");
        let now = Utc::now();
        TransactionMachine::new(
            TransactionHandle::new("req-1", subject),
            now,
            now + Duration::minutes(10),
            max_attempts,
        )
    }

    fn in_progress(uid: &str, ts: &str) -> TransactionUpdate {
        TransactionUpdate::new(12).with_uid(uid).with_timestamp(ts)
    }

    fn polling_machine(max_attempts: u32) -> TransactionMachine {
        let mut m = machine(max_attempts);
        m.begin_trigger().unwrap();
        m.apply_update(in_progress("u1", "t0"));
        assert_eq!(m.phase(), Phase::Polling);
        m
    }

    #[test]
    fn test_happy_path() {
        let mut m = machine(3);
        assert_eq!(m.phase(), Phase::Pending);
        assert_eq!(m.remote_uid(), None);

        let t = m.begin_trigger().unwrap();
        assert_eq!((t.from, t.to), (Phase::Pending, Phase::Triggering));
        assert_eq!(m.state().attempt_count, 1);

        let outcome = m.apply_update(in_progress("u1", "t0"));
        assert!(matches!(outcome, ApplyOutcome::Moved(ref t) if t.to == Phase::Polling));
        assert_eq!(m.remote_uid(), Some("u1"));

        let outcome = m.apply_update(in_progress("u1", "t1"));
        assert!(
            matches!(outcome, ApplyOutcome::Moved(ref t) if t.from == Phase::Polling && t.to == Phase::Polling)
        );

        let done = TransactionUpdate::new(1)
            .with_uid("u1")
            .with_indicator("a", "green")
            .with_indicator("b", "red");
        let outcome = m.apply_update(done);
        assert!(matches!(outcome, ApplyOutcome::Moved(ref t) if t.is_terminal()));
        assert_eq!(m.phase(), Phase::Succeeded);
        assert_eq!(m.remote_uid(), Some("u1"));
        assert_eq!(m.state().verdict(), Some(crate::risk::RiskVerdict::Red));
        assert_eq!(m.state().attempt_count, 1);
    }

    #[test]
    fn test_success_with_remarks_succeeds() {
        let mut m = polling_machine(3);
        m.apply_update(TransactionUpdate::new(2).with_uid("u1"));
        assert_eq!(m.phase(), Phase::Succeeded);
        assert_eq!(
            m.state().last_outcome(),
            Some(OutcomeClass::SuccessWithRemarks)
        );
        assert_eq!(
            m.state().verdict(),
            Some(crate::risk::RiskVerdict::NoVerdict)
        );
    }

    #[test]
    fn test_retryable_poll_response_restarts_from_trigger() {
        let mut m = polling_machine(3);

        let outcome = m.apply_update(TransactionUpdate::new(9).with_uid("u1"));
        assert!(matches!(outcome, ApplyOutcome::Moved(ref t) if t.to == Phase::Pending));
        assert_eq!(m.remote_uid(), None);
        assert_eq!(m.state().attempt_count, 1);

        m.begin_trigger().unwrap();
        assert_eq!(m.state().attempt_count, 2);
        m.apply_update(in_progress("u2", "t2"));
        assert_eq!(m.phase(), Phase::Polling);
        assert_eq!(m.remote_uid(), Some("u2"));
    }

    #[test]
    fn test_retryable_trigger_response_returns_to_pending() {
        let mut m = machine(3);
        m.begin_trigger().unwrap();
        m.apply_update(TransactionUpdate::new(10));
        assert_eq!(m.phase(), Phase::Pending);
        assert_eq!(m.state().attempt_count, 1);
    }

    #[test]
    fn test_attempts_exhausted() {
        let mut m = machine(2);
        m.begin_trigger().unwrap();
        m.apply_update(TransactionUpdate::new(9).with_timestamp("a"));
        assert_eq!(m.phase(), Phase::Pending);

        m.begin_trigger().unwrap();
        m.apply_update(TransactionUpdate::new(9).with_timestamp("b"));
        assert_eq!(m.phase(), Phase::FailedTerminal);
        assert_eq!(
            m.state().failure,
            Some(FailureReason::AttemptsExhausted { attempts: 2 })
        );
    }

    #[test]
    fn test_duplicate_update_is_idempotent() {
        let mut m = polling_machine(3);
        let retry = TransactionUpdate::new(9).with_uid("u1").with_timestamp("t5");

        assert!(matches!(m.apply_update(retry.clone()), ApplyOutcome::Moved(_)));
        assert_eq!(m.apply_update(retry), ApplyOutcome::Duplicate);
        assert_eq!(m.phase(), Phase::Pending);
        assert_eq!(m.state().attempt_count, 1);
    }

    #[test]
    fn test_identical_trigger_responses_each_count() {
        let mut m = machine(2);
        m.begin_trigger().unwrap();
        m.apply_update(TransactionUpdate::new(9));
        assert_eq!(m.phase(), Phase::Pending);

        m.begin_trigger().unwrap();
        let outcome = m.apply_update(TransactionUpdate::new(9));
        assert!(matches!(outcome, ApplyOutcome::Moved(_)));
        assert_eq!(m.phase(), Phase::FailedTerminal);
    }

    #[test]
    fn test_duplicate_success_claims_artifacts_once() {
        let mut m = polling_machine(3);
        let done = TransactionUpdate::new(1)
            .with_uid("u1")
            .with_pdf("https://files/u1.pdf");

        m.apply_update(done.clone());
        assert!(m.begin_artifact_fetch());
        assert_eq!(m.apply_update(done), ApplyOutcome::Duplicate);
        assert!(!m.begin_artifact_fetch());
    }

    #[test]
    fn test_terminal_failures() {
        for (code, expect_escalation) in [(5, false), (255, true), (77, false)] {
            let mut m = polling_machine(3);
            m.apply_update(TransactionUpdate::new(code).with_uid("u1"));
            assert_eq!(m.phase(), Phase::FailedTerminal, "code {}", code);
            let failure = m.state().failure.clone().unwrap();
            assert_eq!(failure.needs_escalation(), expect_escalation, "code {}", code);
            assert_eq!(m.remote_uid(), Some("u1"));
        }
    }

    #[test]
    fn test_trigger_failure_has_no_uid() {
        let mut m = machine(3);
        m.begin_trigger().unwrap();
        m.apply_update(TransactionUpdate::new(5).with_message("no such subject"));
        assert_eq!(m.phase(), Phase::FailedTerminal);
        assert_eq!(m.remote_uid(), None);
    }

    #[test]
    fn test_in_progress_trigger_without_uid_fails() {
        let mut m = machine(3);
        m.begin_trigger().unwrap();
        m.apply_update(TransactionUpdate::new(12));
        assert_eq!(m.phase(), Phase::FailedTerminal);
        assert_eq!(m.state().failure, Some(FailureReason::MissingRemoteUid));
    }

    #[test]
    fn test_synchronous_success_on_trigger() {
        let mut m = machine(3);
        m.begin_trigger().unwrap();
        m.apply_update(TransactionUpdate::new(1).with_uid("u9"));
        assert_eq!(m.phase(), Phase::Succeeded);
        assert_eq!(m.remote_uid(), Some("u9"));
    }

    #[test]
    fn test_stale_uid_is_discarded() {
        let mut m = polling_machine(3);
        let outcome = m.apply_update(TransactionUpdate::new(1).with_uid("old"));
        assert!(matches!(
            outcome,
            ApplyOutcome::Discarded(DiscardReason::StaleUid { .. })
        ));
        assert_eq!(m.phase(), Phase::Polling);
    }

    #[test]
    fn test_terminal_phase_never_regresses() {
        let mut m = polling_machine(3);
        m.apply_update(TransactionUpdate::new(1).with_uid("u1"));
        assert_eq!(m.phase(), Phase::Succeeded);

        let outcome = m.apply_update(TransactionUpdate::new(12).with_uid("u1"));
        assert!(matches!(
            outcome,
            ApplyOutcome::Discarded(DiscardReason::NotAwaitingResponse {
                phase: Phase::Succeeded
            })
        ));
        assert!(m.begin_trigger().is_err());
        assert!(m.cancel().is_err());
        assert!(m.expire_if_due(Utc::now() + Duration::days(1)).is_none());
        assert_eq!(m.phase(), Phase::Succeeded);
    }

    #[test]
    fn test_update_after_cancel_is_discarded() {
        let mut m = polling_machine(3);
        m.cancel().unwrap();
        let outcome = m.apply_update(TransactionUpdate::new(1).with_uid("u1"));
        assert!(matches!(outcome, ApplyOutcome::Discarded(_)));
        assert_eq!(m.phase(), Phase::Cancelled);
    }

    #[test]
    fn test_cancel_twice_is_misuse() {
        let mut m = machine(3);
        m.cancel().unwrap();
        let err = m.cancel().unwrap_err();
        assert!(matches!(
            err,
            TransactionError::AlreadyTerminal {
                phase: Phase::Cancelled,
                ..
            }
        ));
    }

    #[test]
    fn test_expiry() {
        let mut m = polling_machine(3);
        let deadline = m.state().deadline_at;

        assert!(m.expire_if_due(deadline - Duration::seconds(1)).is_none());
        let t = m.expire_if_due(deadline).unwrap();
        assert_eq!((t.from, t.to), (Phase::Polling, Phase::Expired));
        assert_eq!(m.state().failure, Some(FailureReason::DeadlineExceeded));
        assert_eq!(m.remote_uid(), Some("u1"));
    }

    #[test]
    fn test_begin_trigger_only_from_pending_states() {
        let mut m = polling_machine(3);
        let err = m.begin_trigger().unwrap_err();
        assert!(matches!(
            err,
            TransactionError::InvalidPhase {
                actual: Phase::Polling,
                ..
            }
        ));
    }

    #[test]
    fn test_subject_change_is_rejected() {
        let m = machine(3);
        let other = SubjectKey::new("cpf-status").with_param("tax_id", "999");
        assert!(matches!(
            m.ensure_subject(&other),
            Err(TransactionError::SubjectChanged { .. })
        ));
        assert!(m.ensure_subject(&m.subject().clone()).is_ok());
    }

    #[test]
    fn test_trigger_transport_failure() {
        let mut m = machine(2);
        m.begin_trigger().unwrap();
        let t = m.record_transport_failure(&GatewayError::Timeout).unwrap();
        assert_eq!(t.to, Phase::FailedRetryable);
        assert_eq!(m.remote_uid(), None);

        m.begin_trigger().unwrap();
        assert_eq!(m.state().attempt_count, 2);
        let t = m.record_transport_failure(&GatewayError::Timeout).unwrap();
        assert_eq!(t.to, Phase::FailedTerminal);
    }

    #[test]
    fn test_poll_transport_failure_keeps_polling() {
        let mut m = polling_machine(3);
        assert!(m
            .record_transport_failure(&GatewayError::ConnectionFailed("reset".into()))
            .is_none());
        assert_eq!(m.phase(), Phase::Polling);

        let t = m
            .record_transport_failure(&GatewayError::Rejected {
                status: 401,
                body: "bad token".into(),
            })
            .unwrap();
        assert_eq!(t.to, Phase::FailedTerminal);
        assert!(matches!(
            m.state().failure,
            Some(FailureReason::GatewayRejected { .. })
        ));
    }

    #[test]
    fn test_artifact_fetch_failure_keeps_success() {
        let mut m = polling_machine(3);
        m.apply_update(
            TransactionUpdate::new(1)
                .with_uid("u1")
                .with_pdf("https://files/u1.pdf"),
        );
        assert!(m.needs_artifact_fetch());
        assert!(m.begin_artifact_fetch());
        m.finish_artifact_fetch(vec![CompletionWarning::ArtifactFetchFailed {
            kind: ArtifactKind::Pdf,
            error: "HTTP 500".into(),
        }]);

        assert_eq!(m.phase(), Phase::Succeeded);
        assert!(!m.state().artifacts_fetched);
        assert_eq!(m.state().warnings.len(), 1);
        assert!(!m.needs_artifact_fetch());
    }

    #[test]
    fn test_no_artifact_fetch_without_pdf() {
        let mut m = polling_machine(3);
        m.apply_update(TransactionUpdate::new(1).with_uid("u1"));
        assert!(!m.needs_artifact_fetch());
        assert!(!m.begin_artifact_fetch());
    }
}
