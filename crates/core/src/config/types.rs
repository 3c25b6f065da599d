use serde::{Deserialize, Serialize};

pub use crate::scheduler::OrchestratorConfig;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Remote data-source service configuration
#[derive(Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    /// Service base URL (e.g., "https://api.example.com/v1")
    pub base_url: String,
    /// Access token sent with every request
    pub token: String,
    /// Header carrying the token
    #[serde(default = "default_token_header")]
    pub token_header: String,
    /// Request timeout in seconds (default: 30)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u32,
    /// Transport-level retries per operation before giving up
    #[serde(default = "default_transport_retries")]
    pub max_transport_retries: u32,
    /// First retry delay; doubled on each further retry
    #[serde(default = "default_backoff_base")]
    pub transport_backoff_base_ms: u64,
    /// Upper bound for a single retry delay
    #[serde(default = "default_backoff_max")]
    pub transport_backoff_max_ms: u64,
}

fn default_token_header() -> String {
    "Token".to_string()
}

fn default_timeout() -> u32 {
    30
}

fn default_transport_retries() -> u32 {
    3
}

fn default_backoff_base() -> u64 {
    500
}

fn default_backoff_max() -> u64 {
    10_000
}

impl GatewayConfig {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.into(),
            token_header: default_token_header(),
            timeout_secs: default_timeout(),
            max_transport_retries: default_transport_retries(),
            transport_backoff_base_ms: default_backoff_base(),
            transport_backoff_max_ms: default_backoff_max(),
        }
    }
}

// Token stays out of logs.
impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("base_url", &self.base_url)
            .field("token", &"<redacted>")
            .field("token_header", &self.token_header)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_transport_retries", &self.max_transport_retries)
            .field("transport_backoff_base_ms", &self.transport_backoff_base_ms)
            .field("transport_backoff_max_ms", &self.transport_backoff_max_ms)
            .finish()
    }
}

/// Audit pipeline configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuditConfig {
    /// Capacity of the buffered hand-off to the audit sink
    #[serde(default = "default_audit_buffer")]
    pub buffer_size: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_audit_buffer(),
        }
    }
}

fn default_audit_buffer() -> usize {
    1000
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    #[serde(default = "default_filter")]
    pub filter: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            format: LogFormat::default(),
        }
    }
}

fn default_filter() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_debug_redacts_token() {
        let config = GatewayConfig::new("https://api.example.com", "super-secret");
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_gateway_defaults() {
        let config: GatewayConfig =
            toml::from_str("base_url = \"https://x\"\ntoken = \"t\"").unwrap();
        assert_eq!(config.token_header, "Token");
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.max_transport_retries, 3);
        assert_eq!(config.transport_backoff_base_ms, 500);
        assert_eq!(config.transport_backoff_max_ms, 10_000);
    }

    #[test]
    fn test_logging_defaults() {
        let config = LoggingConfig::default();
        assert_eq!(config.filter, "info");
        assert_eq!(config.format, LogFormat::Pretty);
    }
}
