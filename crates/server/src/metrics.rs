//! Prometheus metrics for the HTTP server.
//!
//! HTTP request metrics live here; poller, orchestrator and autopilot
//! metrics come from `shipyard_core::metrics` and are registered on the same
//! registry. A few gauges are refreshed from live state on every scrape.

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use shipyard_core::TaskPhase;

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
            "shipyard_http_request_duration_seconds",
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
        Opts::new("shipyard_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "shipyard_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

// =============================================================================
// Scrape-time gauges
// =============================================================================

/// Monitor entries by phase.
pub static TASKS_BY_PHASE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("shipyard_tasks_by_phase", "Tracked tasks by lifecycle phase"),
        &["phase"],
    )
    .unwrap()
});

/// Tasks waiting in the orchestrator queue.
pub static ORCHESTRATOR_QUEUED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "shipyard_orchestrator_queued",
        "Tasks waiting in the orchestrator queue",
    )
    .unwrap()
});

/// Poller handlers currently holding a slot.
pub static POLLER_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "shipyard_poller_in_flight",
        "Poller handlers currently running",
    )
    .unwrap()
});

/// 1 while the autopilot circuit breaker is open.
pub static AUTOPILOT_PAUSED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("shipyard_autopilot_paused", "Autopilot circuit breaker open").unwrap()
});

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

    // Scrape-time
    registry.register(Box::new(TASKS_BY_PHASE.clone())).unwrap();
    registry
        .register(Box::new(ORCHESTRATOR_QUEUED.clone()))
        .unwrap();
    registry.register(Box::new(POLLER_IN_FLIGHT.clone())).unwrap();
    registry.register(Box::new(AUTOPILOT_PAUSED.clone())).unwrap();

    // Core metrics (poller, orchestrator, autopilot)
    for metric in shipyard_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Refresh gauges that mirror live component state.
pub fn collect_dynamic_metrics(state: &AppState) {
    let tasks = state.monitor().get_all();
    for phase in [
        TaskPhase::Registered,
        TaskPhase::Running,
        TaskPhase::Completed,
        TaskPhase::Failed,
    ] {
        let count = tasks.iter().filter(|t| t.phase == phase).count();
        TASKS_BY_PHASE
            .with_label_values(&[phase.as_str()])
            .set(count as i64);
    }

    if let Some(orchestrator) = state.orchestrator() {
        ORCHESTRATOR_QUEUED.set(orchestrator.status().queued as i64);
    }
    if let Some(poller) = state.poller() {
        POLLER_IN_FLIGHT.set(poller.status().in_flight as i64);
    }
    if let Some(autopilot) = state.autopilot() {
        AUTOPILOT_PAUSED.set(i64::from(autopilot.is_paused()));
    }
}

static NUMERIC_SEGMENT: Lazy<regex_lite::Regex> =
    Lazy::new(|| regex_lite::Regex::new(r"/\d+(/|$)").unwrap());
static TASK_SEGMENT: Lazy<regex_lite::Regex> =
    Lazy::new(|| regex_lite::Regex::new(r"/tasks/task-[^/]+").unwrap());

/// Normalize a path for metric labels (replace IDs with placeholders).
pub fn normalize_path(path: &str) -> String {
    let result = TASK_SEGMENT.replace_all(path, "/tasks/{id}");
    let result = NUMERIC_SEGMENT.replace_all(&result, "/{id}$1");
    result.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_pr_number() {
        let path = "/api/v1/autopilot/prs/1234";
        assert_eq!(normalize_path(path), "/api/v1/autopilot/prs/{id}");
    }

    #[test]
    fn test_normalize_path_task_id() {
        let path = "/api/v1/tasks/task-42-a1b2c3d4e5f6";
        assert_eq!(normalize_path(path), "/api/v1/tasks/{id}");
    }

    #[test]
    fn test_normalize_path_keeps_named_segments() {
        assert_eq!(normalize_path("/api/v1/tasks/running"), "/api/v1/tasks/running");
        assert_eq!(normalize_path("/api/v1/health"), "/api/v1/health");
    }

    #[test]
    fn test_encode_metrics_returns_prometheus_format() {
        HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/test", "200"])
            .inc();

        let output = encode_metrics();
        assert!(output.contains("shipyard_http_requests_total"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }

    #[test]
    fn test_registry_contains_core_metrics() {
        shipyard_core::metrics::TASKS_QUEUED.inc_by(0);
        shipyard_core::metrics::POLLER_DISPATCHED.inc_by(0);
        shipyard_core::metrics::AUTOPILOT_ACTIVE.set(0);
        AUTOPILOT_PAUSED.set(0);

        let output = encode_metrics();
        assert!(output.contains("shipyard_tasks_queued_total"));
        assert!(output.contains("shipyard_poller_dispatched_total"));
        assert!(output.contains("shipyard_autopilot_active_prs"));
        assert!(output.contains("shipyard_autopilot_paused"));
    }
}
