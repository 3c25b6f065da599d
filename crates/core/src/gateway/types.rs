//! Canonical gateway types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::classifier::{classify, OutcomeClass};
use crate::risk::RiskIndicator;

/// Input parameters identifying what is being checked.
///
/// Parameters are kept sorted so that two keys built in a different order
/// compare (and fingerprint) equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubjectKey {
    /// Data source endpoint the subject is checked against (e.g. `"cpf-status"`).
    pub data_source: String,
    /// Subject parameters (e.g. `tax_id`, `document_type`).
    pub params: BTreeMap<String, String>,
}

impl SubjectKey {
    pub fn new(data_source: impl Into<String>) -> Self {
        Self {
            data_source: data_source.into(),
            params: BTreeMap::new(),
        }
    }

    /// Add a parameter (builder style).
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Stable SHA-256 fingerprint used for submit deduplication.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.data_source.as_bytes());
        for (name, value) in &self.params {
            hasher.update([0u8]);
            hasher.update(name.as_bytes());
            hasher.update([b'=']);
            hasher.update(value.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }
}

/// One remote response, normalised.
///
/// Every field the remote reports is carried through verbatim so callers and
/// audit records see exactly what the service said.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionUpdate {
    /// Numeric status code as returned.
    pub code: i64,
    /// Human-readable status (e.g. `"InProgress"`).
    pub status: String,
    /// Machine-readable status (e.g. `"in_progress"`).
    pub status_code: String,
    /// Service-assigned transaction UID, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    pub message: String,
    /// Remote timestamp, passed through as received.
    pub timestamp: String,
    pub elapsed_ms: u64,
    /// Opaque result payload. Only ever handled as a whole.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_payload: Option<serde_json::Value>,
    #[serde(default)]
    pub has_pdf: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_files_url: Option<String>,
    #[serde(default)]
    pub risk_indicators: Vec<RiskIndicator>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_credits: Option<serde_json::Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance_credits: Option<serde_json::Number>,
}

impl TransactionUpdate {
    /// Minimal update for a code; the remaining fields are empty.
    pub fn new(code: i64) -> Self {
        let outcome = classify(code);
        Self {
            code,
            status: outcome.pascal_name().to_string(),
            status_code: outcome.snake_name().to_string(),
            uid: None,
            message: String::new(),
            timestamp: String::new(),
            elapsed_ms: 0,
            result_payload: None,
            has_pdf: false,
            pdf_url: None,
            original_files_url: None,
            risk_indicators: Vec::new(),
            cost_credits: None,
            balance_credits: None,
        }
    }

    pub fn with_uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = Some(uid.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = timestamp.into();
        self
    }

    pub fn with_result(mut self, payload: serde_json::Value) -> Self {
        self.result_payload = Some(payload);
        self
    }

    pub fn with_pdf(mut self, url: impl Into<String>) -> Self {
        self.has_pdf = true;
        self.pdf_url = Some(url.into());
        self
    }

    pub fn with_original_files(mut self, url: impl Into<String>) -> Self {
        self.original_files_url = Some(url.into());
        self
    }

    pub fn with_indicator(mut self, source: &str, indicator: &str) -> Self {
        self.risk_indicators.push(RiskIndicator::new(source, indicator));
        self
    }

    pub fn outcome(&self) -> OutcomeClass {
        classify(self.code)
    }
}

/// Network operation kinds dispatched by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Trigger,
    Poll,
    ArtifactFetch,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trigger => "trigger",
            Self::Poll => "poll",
            Self::ArtifactFetch => "artifact_fetch",
        }
    }
}
