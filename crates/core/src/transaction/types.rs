//! Transaction data types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::artifact::ArtifactKind;
use crate::classifier::OutcomeClass;
use crate::gateway::{SubjectKey, TransactionUpdate};
use crate::risk::{aggregate, RiskError, RiskVerdict};

/// Identifies one remote execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionHandle {
    /// Caller-assigned correlation id, stable for the handle's lifetime.
    pub local_request_id: String,
    /// What is being checked. Fixed at submission.
    pub subject: SubjectKey,
    /// Service-assigned UID of the current remote execution, once known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_uid: Option<String>,
}

impl TransactionHandle {
    pub fn new(local_request_id: impl Into<String>, subject: SubjectKey) -> Self {
        Self {
            local_request_id: local_request_id.into(),
            subject,
            remote_uid: None,
        }
    }
}

/// Lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Waiting for a trigger to be sent.
    Pending,
    /// Trigger in flight.
    Triggering,
    /// UID known, waiting for the remote to finish.
    Polling,
    Succeeded,
    FailedTerminal,
    /// The last trigger could not be delivered; a new one will follow.
    FailedRetryable,
    Expired,
    Cancelled,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::FailedTerminal | Self::Expired | Self::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Triggering => "triggering",
            Self::Polling => "polling",
            Self::Succeeded => "succeeded",
            Self::FailedTerminal => "failed_terminal",
            Self::FailedRetryable => "failed_retryable",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error taxonomy shared by failure reasons and warnings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TransientTransport,
    RemoteRetryable,
    RemoteTerminalFailure,
    DeadlineExceeded,
    ArtifactFetchFailure,
    CallerMisuse,
}

/// Why a transaction ended without success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FailureReason {
    /// Retryable outcomes kept coming until the trigger budget ran out.
    AttemptsExhausted { attempts: u32 },
    /// Non-retryable remote outcome (entity not found, unknown code).
    RemoteFailure {
        outcome: OutcomeClass,
        code: i64,
        message: String,
    },
    /// Remote system error; needs manual escalation.
    SystemError { code: i64, message: String },
    /// An in-progress trigger response carried no UID.
    MissingRemoteUid,
    /// The gateway refused the request outright.
    GatewayRejected { detail: String },
    DeadlineExceeded,
}

impl FailureReason {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AttemptsExhausted { .. } => ErrorKind::RemoteRetryable,
            Self::RemoteFailure { .. }
            | Self::SystemError { .. }
            | Self::MissingRemoteUid
            | Self::GatewayRejected { .. } => ErrorKind::RemoteTerminalFailure,
            Self::DeadlineExceeded => ErrorKind::DeadlineExceeded,
        }
    }

    /// Whether this failure should be escalated to a human.
    pub fn needs_escalation(&self) -> bool {
        matches!(self, Self::SystemError { .. })
    }
}

/// Problems that degrade a result without invalidating it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CompletionWarning {
    ArtifactFetchFailed { kind: ArtifactKind, error: String },
    UnrecognizedRiskIndicator { source_name: String, value: String },
}

impl CompletionWarning {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ArtifactFetchFailed { .. } => ErrorKind::ArtifactFetchFailure,
            Self::UnrecognizedRiskIndicator { .. } => ErrorKind::CallerMisuse,
        }
    }
}

impl From<RiskError> for CompletionWarning {
    fn from(error: RiskError) -> Self {
        match error {
            RiskError::UnrecognizedIndicator { source_name, value } => {
                Self::UnrecognizedRiskIndicator { source_name, value }
            }
        }
    }
}

/// Snapshot of one transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionState {
    pub handle: TransactionHandle,
    pub phase: Phase,
    /// Trigger requests sent so far.
    pub attempt_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<TransactionUpdate>,
    pub created_at: DateTime<Utc>,
    pub deadline_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// True once every artifact of a successful result has been archived.
    pub artifacts_fetched: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<CompletionWarning>,
}

impl TransactionState {
    /// Risk verdict of a successful transaction.
    ///
    /// `None` unless the phase is `Succeeded` and every indicator was recognised.
    pub fn verdict(&self) -> Option<RiskVerdict> {
        if self.phase != Phase::Succeeded {
            return None;
        }
        let update = self.last_update.as_ref()?;
        aggregate(&update.risk_indicators).ok()
    }

    /// Outcome of the most recent remote response.
    pub fn last_outcome(&self) -> Option<OutcomeClass> {
        self.last_update.as_ref().map(|u| u.outcome())
    }
}
