//! Status code classification.
//!
//! The remote service reports every execution state as a small integer code
//! plus two textual renderings of it (`"InProgress"` / `"in_progress"`).
//! Only the numeric code drives behaviour; the textual forms are projections
//! of [`OutcomeClass`] and are never branched on.

use serde::{Deserialize, Serialize};

/// Closed set of outcomes a status code can map to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeClass {
    /// Execution finished, result available.
    Success,
    /// Execution finished with remarks attached to the result.
    SuccessWithRemarks,
    /// Execution still running, poll again later.
    InProgress,
    /// The subject does not exist at the data source.
    EntityNotFound,
    /// The remote execution timed out; a fresh trigger is required.
    RetryableTimeout,
    /// The remote ran out of internal attempts; a fresh trigger is required.
    RetryableAttemptsExceeded,
    /// Remote system failure, needs manual escalation.
    SystemError,
    /// Code outside the documented set.
    Unknown,
}

/// What the orchestrator must do after observing an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequiredAction {
    /// Finish the transaction successfully.
    Complete,
    /// Keep the same UID and poll again after the poll interval.
    PollAgain,
    /// Discard the UID and start over with a new trigger.
    Retrigger,
    /// Finish the transaction as failed.
    Fail,
    /// Finish as failed and flag for manual escalation.
    Escalate,
}

/// Map a raw remote status code onto its outcome class.
///
/// Total over all integers: anything undocumented is [`OutcomeClass::Unknown`].
pub fn classify(code: i64) -> OutcomeClass {
    match code {
        1 => OutcomeClass::Success,
        2 => OutcomeClass::SuccessWithRemarks,
        5 => OutcomeClass::EntityNotFound,
        9 => OutcomeClass::RetryableTimeout,
        10 => OutcomeClass::RetryableAttemptsExceeded,
        12 => OutcomeClass::InProgress,
        255 => OutcomeClass::SystemError,
        _ => OutcomeClass::Unknown,
    }
}

impl OutcomeClass {
    /// Human-readable (PascalCase) rendering.
    pub fn pascal_name(&self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::SuccessWithRemarks => "SuccessWithRemarks",
            Self::InProgress => "InProgress",
            Self::EntityNotFound => "EntityNotFound",
            Self::RetryableTimeout => "RetryableTimeout",
            Self::RetryableAttemptsExceeded => "RetryableAttemptsExceeded",
            Self::SystemError => "SystemError",
            Self::Unknown => "Unknown",
        }
    }

    /// Machine-readable (snake_case) rendering.
    pub fn snake_name(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::SuccessWithRemarks => "success_with_remarks",
            Self::InProgress => "in_progress",
            Self::EntityNotFound => "entity_not_found",
            Self::RetryableTimeout => "retryable_timeout",
            Self::RetryableAttemptsExceeded => "retryable_attempts_exceeded",
            Self::SystemError => "system_error",
            Self::Unknown => "unknown",
        }
    }

    pub fn required_action(&self) -> RequiredAction {
        match self {
            Self::Success | Self::SuccessWithRemarks => RequiredAction::Complete,
            Self::InProgress => RequiredAction::PollAgain,
            Self::RetryableTimeout | Self::RetryableAttemptsExceeded => RequiredAction::Retrigger,
            Self::EntityNotFound | Self::Unknown => RequiredAction::Fail,
            Self::SystemError => RequiredAction::Escalate,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success | Self::SuccessWithRemarks)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RetryableTimeout | Self::RetryableAttemptsExceeded
        )
    }

    /// Terminal failure classes: never retried automatically.
    pub fn is_terminal_failure(&self) -> bool {
        matches!(
            self,
            Self::EntityNotFound | Self::SystemError | Self::Unknown
        )
    }
}

impl std::fmt::Display for OutcomeClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.snake_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_documented_codes() {
        assert_eq!(classify(1), OutcomeClass::Success);
        assert_eq!(classify(2), OutcomeClass::SuccessWithRemarks);
        assert_eq!(classify(5), OutcomeClass::EntityNotFound);
        assert_eq!(classify(9), OutcomeClass::RetryableTimeout);
        assert_eq!(classify(10), OutcomeClass::RetryableAttemptsExceeded);
        assert_eq!(classify(12), OutcomeClass::InProgress);
        assert_eq!(classify(255), OutcomeClass::SystemError);
    }

    #[test]
    fn test_undocumented_codes_are_unknown() {
        for code in [0, 3, 4, 6, 7, 8, 11, 13, 254, 256, -1, i64::MAX, i64::MIN] {
            assert_eq!(classify(code), OutcomeClass::Unknown, "code {}", code);
        }
    }

    #[test]
    fn test_required_actions() {
        assert_eq!(classify(1).required_action(), RequiredAction::Complete);
        assert_eq!(classify(2).required_action(), RequiredAction::Complete);
        assert_eq!(classify(12).required_action(), RequiredAction::PollAgain);
        assert_eq!(classify(9).required_action(), RequiredAction::Retrigger);
        assert_eq!(classify(10).required_action(), RequiredAction::Retrigger);
        assert_eq!(classify(5).required_action(), RequiredAction::Fail);
        assert_eq!(classify(42).required_action(), RequiredAction::Fail);
        assert_eq!(classify(255).required_action(), RequiredAction::Escalate);
    }

    #[test]
    fn test_entity_not_found_is_not_system_error() {
        let class = classify(5);
        assert!(class.is_terminal_failure());
        assert_ne!(class.required_action(), RequiredAction::Escalate);
    }

    #[test]
    fn test_name_projections() {
        assert_eq!(OutcomeClass::InProgress.pascal_name(), "InProgress");
        assert_eq!(OutcomeClass::InProgress.snake_name(), "in_progress");
        assert_eq!(
            OutcomeClass::SuccessWithRemarks.to_string(),
            "success_with_remarks"
        );

        let json = serde_json::to_string(&OutcomeClass::RetryableTimeout).unwrap();
        assert_eq!(json, "\"retryable_timeout\"");
    }
}
