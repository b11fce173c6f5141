//! Prometheus metrics for observability.
//!
//! This module provides metrics for monitoring the orchestrator server:
//! - HTTP request metrics (latency, counts, errors)
//! - Pipelines by status and stage (collected dynamically)
//! - Queue depths (collected dynamically)

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use tracing::warn;

use crate::state::AppState;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "pce_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("pce_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "pce_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

/// Authentication failures.
pub static AUTH_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("pce_auth_failures_total", "Total authentication failures"),
        &["reason"],
    )
    .unwrap()
});

// =============================================================================
// Pipeline Metrics (collected dynamically)
// =============================================================================

/// Pipelines by current status.
pub static PIPELINES_BY_STATUS: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("pce_pipelines_by_status", "Current pipeline count by status"),
        &["status"],
    )
    .unwrap()
});

/// Non-terminal pipelines by current stage.
pub static PIPELINES_ACTIVE_BY_STAGE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new(
            "pce_pipelines_active_by_stage",
            "Non-terminal pipelines by current stage",
        ),
        &["stage"],
    )
    .unwrap()
});

// =============================================================================
// Queue Metrics (collected dynamically)
// =============================================================================

/// Jobs per queue and state.
pub static QUEUE_DEPTH: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("pce_queue_jobs", "Jobs per queue and state"),
        &["queue", "state"],
    )
    .unwrap()
});

/// Whether a queue is paused (1) or running (0).
pub static QUEUE_PAUSED: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("pce_queue_paused", "Whether the queue is paused"),
        &["queue"],
    )
    .unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    // HTTP
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();
    registry
        .register(Box::new(AUTH_FAILURES_TOTAL.clone()))
        .unwrap();

    // Pipelines
    registry
        .register(Box::new(PIPELINES_BY_STATUS.clone()))
        .unwrap();
    registry
        .register(Box::new(PIPELINES_ACTIVE_BY_STAGE.clone()))
        .unwrap();

    // Queues
    registry.register(Box::new(QUEUE_DEPTH.clone())).unwrap();
    registry.register(Box::new(QUEUE_PAUSED.clone())).unwrap();

    // Core metrics (pipelines, queues, providers, webhooks)
    for metric in pce_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Collect dynamic metrics from current application state.
///
/// Called before encoding so gauges reflect the stores, not just this
/// process's activity. Pipeline figures cover every brand.
pub fn collect_dynamic_metrics(state: &AppState) {
    match state.pipelines().stats(None) {
        Ok(stats) => {
            for (status, count) in [
                ("PENDING", stats.pending),
                ("IN_PROGRESS", stats.in_progress),
                ("COMPLETED", stats.completed),
                ("FAILED", stats.failed),
                ("CANCELLED", stats.cancelled),
            ] {
                PIPELINES_BY_STATUS.with_label_values(&[status]).set(count);
            }
            PIPELINES_ACTIVE_BY_STAGE.reset();
            for (stage, count) in &stats.active_by_stage {
                PIPELINES_ACTIVE_BY_STAGE
                    .with_label_values(&[stage.as_str()])
                    .set(*count);
            }
        }
        Err(e) => warn!(error = %e, "Failed to collect pipeline stats"),
    }

    match state.queues().get_all_queues_status() {
        Ok(queues) => {
            for queue in queues {
                let counts = &queue.counts;
                for (job_state, count) in [
                    ("waiting", counts.waiting),
                    ("active", counts.active),
                    ("completed", counts.completed),
                    ("failed", counts.failed),
                    ("delayed", counts.delayed),
                    ("paused", counts.paused),
                ] {
                    QUEUE_DEPTH
                        .with_label_values(&[queue.name.as_str(), job_state])
                        .set(count);
                }
                QUEUE_PAUSED
                    .with_label_values(&[queue.name.as_str()])
                    .set(i64::from(counts.is_paused));
            }
        }
        Err(e) => warn!(error = %e, "Failed to collect queue counts"),
    }
}

/// Normalize a path for metric labels (replace IDs with placeholders).
pub fn normalize_path(path: &str) -> String {
    static UUID: Lazy<regex_lite::Regex> = Lazy::new(|| {
        regex_lite::Regex::new(
            r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}",
        )
        .unwrap()
    });
    static NUMERIC: Lazy<regex_lite::Regex> =
        Lazy::new(|| regex_lite::Regex::new(r"/\d+(/|$)").unwrap());
    // Tracking numbers have no fixed shape
    static TRACKING: Lazy<regex_lite::Regex> =
        Lazy::new(|| regex_lite::Regex::new(r"/tracking/[^/]+").unwrap());

    let result = UUID.replace_all(path, "{id}");
    let result = TRACKING.replace_all(&result, "/tracking/{tracking_number}");
    let result = NUMERIC.replace_all(&result, "/{id}$1");
    result.to_string()
}
