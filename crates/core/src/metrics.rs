//! Prometheus metrics for the orchestrator.
//!
//! This module provides metrics for:
//! - Dispatch (triggers, polls, dropped duplicate dispatches)
//! - Outcomes (per status class, per terminal phase)
//! - Gateway transport (request durations, retries)
//! - Side channels (audit hand-off losses, artifact fetches)

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Dispatch Metrics
// =============================================================================

/// Trigger requests sent.
pub static TRIGGERS_SENT: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("bgcheck_triggers_sent_total", "Total trigger requests sent").unwrap()
});

/// Poll requests sent.
pub static POLLS_SENT: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("bgcheck_polls_sent_total", "Total poll requests sent").unwrap()
});

/// Timer firings dropped because an operation for the same transaction was in flight.
pub static DUPLICATE_DISPATCH_DROPPED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "bgcheck_duplicate_dispatch_dropped_total",
        "Dispatches dropped because the same UID was already in flight",
    )
    .unwrap()
});

// =============================================================================
// Outcome Metrics
// =============================================================================

/// Remote responses by outcome class.
pub static OUTCOMES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("bgcheck_outcomes_total", "Remote responses by outcome class"),
        &["class"],
    )
    .unwrap()
});

/// Transactions reaching a terminal phase.
pub static TRANSACTIONS_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "bgcheck_transactions_finished_total",
            "Transactions reaching a terminal phase",
        ),
        &["phase"], // "succeeded", "failed_terminal", "expired", "cancelled"
    )
    .unwrap()
});

// =============================================================================
// Gateway Metrics
// =============================================================================

/// Gateway request duration.
pub static GATEWAY_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "bgcheck_gateway_request_duration_seconds",
            "Duration of individual gateway requests",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["operation"],
    )
    .unwrap()
});

/// Transport-level retries performed by the gateway.
pub static TRANSPORT_RETRIES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "bgcheck_transport_retries_total",
            "Transport retries performed by the gateway",
        ),
        &["operation"],
    )
    .unwrap()
});

// =============================================================================
// Side Channel Metrics
// =============================================================================

/// Audit records that could not be handed off to the sink.
pub static AUDIT_RECORDS_DROPPED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "bgcheck_audit_records_dropped_total",
        "Audit records lost before reaching the sink",
    )
    .unwrap()
});

/// Artifact fetches by kind and result.
pub static ARTIFACT_FETCHES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("bgcheck_artifact_fetches_total", "Artifact fetch attempts"),
        &["kind", "result"], // result: "stored", "failed"
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(TRIGGERS_SENT.clone()),
        Box::new(POLLS_SENT.clone()),
        Box::new(DUPLICATE_DISPATCH_DROPPED.clone()),
        Box::new(OUTCOMES.clone()),
        Box::new(TRANSACTIONS_FINISHED.clone()),
        Box::new(GATEWAY_REQUEST_DURATION.clone()),
        Box::new(TRANSPORT_RETRIES.clone()),
        Box::new(AUDIT_RECORDS_DROPPED.clone()),
        Box::new(ARTIFACT_FETCHES.clone()),
    ]
}

/// Register every collector with `registry`.
pub fn register_all(registry: &prometheus::Registry) -> Result<(), prometheus::Error> {
    for collector in all_metrics() {
        registry.register(collector)?;
    }
    Ok(())
}
