//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Pipelines (stage transitions, outcomes)
//! - Queues (job outcomes)
//! - Providers (call duration and results)
//! - Webhooks and the tracking sweep

use std::time::Duration;

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Pipeline Metrics
// =============================================================================

/// Pipelines created total.
pub static PIPELINES_CREATED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("pce_pipelines_created_total", "Total pipelines created").unwrap()
});

/// Stage transitions by source and target stage.
pub static STAGE_TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("pce_stage_transitions_total", "Pipeline stage transitions"),
        &["from_stage", "to_stage"],
    )
    .unwrap()
});

/// Pipelines that reached an outcome.
pub static PIPELINE_OUTCOMES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("pce_pipeline_outcomes_total", "Pipeline outcomes"),
        &["outcome"], // "completed", "failed", "cancelled", "retried"
    )
    .unwrap()
});

/// Optimistic concurrency conflicts retried internally.
pub static VERSION_CONFLICTS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "pce_pipeline_version_conflicts_total",
        "Pipeline updates that lost a version race",
    )
    .unwrap()
});

// =============================================================================
// Queue Metrics
// =============================================================================

/// Stage jobs processed by queue and result.
pub static QUEUE_JOBS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("pce_queue_jobs_total", "Queue jobs processed"),
        &["queue", "result"], // "completed", "skipped", "waiting", "retrying", "exhausted", "dead_lettered"
    )
    .unwrap()
});

/// Stage job duration in seconds.
pub static STAGE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("pce_stage_duration_seconds", "Time a pipeline spent in a stage before advancing")
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 120.0]),
        &["stage"],
    )
    .unwrap()
});

// =============================================================================
// Provider Metrics
// =============================================================================

/// Provider request duration.
pub static PROVIDER_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "pce_provider_request_duration_seconds",
            "Duration of provider API calls",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["provider", "operation"],
    )
    .unwrap()
});

/// Provider requests total.
pub static PROVIDER_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("pce_provider_requests_total", "Total provider API requests"),
        &["provider", "operation", "status"], // status: "success", "error"
    )
    .unwrap()
});

// =============================================================================
// Webhook and Tracking Metrics
// =============================================================================

/// Webhooks ingested by source and result.
pub static WEBHOOKS_RECEIVED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("pce_webhooks_received_total", "Webhooks received"),
        &["source", "result"], // result: "accepted", "invalid_signature", "ignored"
    )
    .unwrap()
});

/// Tracking sweeps run.
pub static TRACKING_SWEEPS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("pce_tracking_sweeps_total", "Tracking sweeps run"),
        &["result"], // "success", "error"
    )
    .unwrap()
});

/// Tracking numbers re-subscribed by sweeps.
pub static TRACKING_RESUBSCRIBED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "pce_tracking_resubscribed_total",
        "Tracking numbers re-subscribed by sweeps",
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Record one provider call.
pub fn record_provider_call(provider: &str, operation: &str, ok: bool, elapsed: Duration) {
    PROVIDER_REQUEST_DURATION
        .with_label_values(&[provider, operation])
        .observe(elapsed.as_secs_f64());
    PROVIDER_REQUESTS
        .with_label_values(&[provider, operation, if ok { "success" } else { "error" }])
        .inc();
}

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Pipelines
        Box::new(PIPELINES_CREATED.clone()),
        Box::new(STAGE_TRANSITIONS.clone()),
        Box::new(PIPELINE_OUTCOMES.clone()),
        Box::new(VERSION_CONFLICTS.clone()),
        // Queues
        Box::new(QUEUE_JOBS.clone()),
        Box::new(STAGE_DURATION.clone()),
        // Providers
        Box::new(PROVIDER_REQUEST_DURATION.clone()),
        Box::new(PROVIDER_REQUESTS.clone()),
        // Webhooks and tracking
        Box::new(WEBHOOKS_RECEIVED.clone()),
        Box::new(TRACKING_SWEEPS.clone()),
        Box::new(TRACKING_RESUBSCRIBED.clone()),
    ]
}
