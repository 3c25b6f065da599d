use thiserror::Error;

/// Errors raised by a [`RemoteGateway`](super::RemoteGateway).
///
/// These describe transport-level trouble only. Status codes reported by the
/// remote service arrive as a successful [`TransactionUpdate`](super::TransactionUpdate).
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("Request timeout")]
    Timeout,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Request rejected with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Gateway setup failed: {0}")]
    Setup(String),
}

impl GatewayError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Rejected { .. } | Self::Setup(_))
    }
}
