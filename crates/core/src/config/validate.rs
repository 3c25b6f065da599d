use super::{types::Config, ConfigError};

/// Longest accepted `orchestrator.default_deadline_secs` (30 days).
const MAX_DEFAULT_DEADLINE_SECS: u64 = 30 * 24 * 60 * 60;

/// Validate configuration
/// Currently validates:
/// - Gateway base URL and token are set
/// - Orchestrator intervals, attempt and concurrency bounds are non-zero
/// - Default deadline is non-zero and at most 30 days
/// - Retrigger jitter range is ordered
/// - Audit buffer is non-zero
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    fn invalid(msg: &str) -> Result<(), ConfigError> {
        Err(ConfigError::ValidationError(msg.to_string()))
    }

    if config.gateway.base_url.trim().is_empty() {
        return invalid("gateway.base_url cannot be empty");
    }
    if config.gateway.token.trim().is_empty() {
        return invalid("gateway.token cannot be empty");
    }

    let orch = &config.orchestrator;
    if orch.poll_interval_ms == 0 {
        return invalid("orchestrator.poll_interval_ms cannot be 0");
    }
    if orch.tick_interval_ms == 0 {
        return invalid("orchestrator.tick_interval_ms cannot be 0");
    }
    if orch.sweep_interval_ms == 0 {
        return invalid("orchestrator.sweep_interval_ms cannot be 0");
    }
    if orch.max_trigger_attempts == 0 {
        return invalid("orchestrator.max_trigger_attempts cannot be 0");
    }
    if orch.max_concurrent_operations == 0 {
        return invalid("orchestrator.max_concurrent_operations cannot be 0");
    }
    if orch.default_deadline_secs == 0 {
        return invalid("orchestrator.default_deadline_secs cannot be 0");
    }
    if orch.default_deadline_secs > MAX_DEFAULT_DEADLINE_SECS {
        return invalid("orchestrator.default_deadline_secs cannot exceed 30 days");
    }
    if orch.retrigger_jitter_min_ms > orch.retrigger_jitter_max_ms {
        return invalid(
            "orchestrator.retrigger_jitter_min_ms cannot exceed retrigger_jitter_max_ms",
        );
    }

    if config.audit.buffer_size == 0 {
        return invalid("audit.buffer_size cannot be 0");
    }

    Ok(())
}
