//! Orchestrator configuration.

use serde::{Deserialize, Serialize};

/// Timing and budget settings for the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Delay between an `InProgress` response and the next poll (milliseconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// How often the dispatch loop looks for due transactions (milliseconds).
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,

    /// How often the deadline sweep runs (milliseconds).
    /// Deadlines fire within one sweep even for idle transactions.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,

    /// Trigger requests allowed per transaction before it fails.
    #[serde(default = "default_max_trigger_attempts")]
    pub max_trigger_attempts: u32,

    /// Lower bound of the delay before a re-trigger (milliseconds).
    #[serde(default = "default_jitter_min")]
    pub retrigger_jitter_min_ms: u64,

    /// Upper bound of the delay before a re-trigger (milliseconds).
    #[serde(default = "default_jitter_max")]
    pub retrigger_jitter_max_ms: u64,

    /// Network operations allowed in flight at once, across all transactions.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_operations: usize,

    /// Network operations started per minute (0 = unlimited).
    #[serde(default)]
    pub max_operations_per_minute: u32,

    /// Deadline used when `submit` is not given one (seconds).
    #[serde(default = "default_deadline")]
    pub default_deadline_secs: u64,

    /// How long a finished transaction stays queryable before the sweep
    /// evicts it (seconds).
    #[serde(default = "default_terminal_retention")]
    pub terminal_retention_secs: u64,

    /// Capacity of the completion broadcast channel.
    /// Slow subscribers lag and skip events beyond this.
    #[serde(default = "default_completion_buffer")]
    pub completion_buffer: usize,
}

fn default_poll_interval() -> u64 {
    30_000 // 30 seconds
}

fn default_tick_interval() -> u64 {
    250
}

fn default_sweep_interval() -> u64 {
    1000
}

fn default_max_trigger_attempts() -> u32 {
    3
}

fn default_jitter_min() -> u64 {
    1000
}

fn default_jitter_max() -> u64 {
    5000
}

fn default_max_concurrent() -> usize {
    8
}

fn default_deadline() -> u64 {
    900 // 15 minutes
}

fn default_terminal_retention() -> u64 {
    3600
}

fn default_completion_buffer() -> usize {
    256
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            tick_interval_ms: default_tick_interval(),
            sweep_interval_ms: default_sweep_interval(),
            max_trigger_attempts: default_max_trigger_attempts(),
            retrigger_jitter_min_ms: default_jitter_min(),
            retrigger_jitter_max_ms: default_jitter_max(),
            max_concurrent_operations: default_max_concurrent(),
            max_operations_per_minute: 0,
            default_deadline_secs: default_deadline(),
            terminal_retention_secs: default_terminal_retention(),
            completion_buffer: default_completion_buffer(),
        }
    }
}
