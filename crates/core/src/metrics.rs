//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Poller (ticks, dispatches, handler failures, rate limiting)
//! - Orchestrator (queueing, drops, task outcomes and durations)
//! - Autopilot (stage transitions, failures, tracked PRs)

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Poller Metrics
// =============================================================================

/// Listing calls by result.
pub static POLLER_LISTINGS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("shipyard_poller_listings_total", "Work-item listing calls"),
        &["result"], // "ok", "error", "rate_limited"
    )
    .unwrap()
});

/// Items handed to the handler.
pub static POLLER_DISPATCHED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "shipyard_poller_dispatched_total",
        "Work items dispatched to the handler",
    )
    .unwrap()
});

/// Handler invocations that returned an error.
pub static POLLER_HANDLER_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "shipyard_poller_handler_failures_total",
        "Handler invocations that returned an error",
    )
    .unwrap()
});

// =============================================================================
// Orchestrator Metrics
// =============================================================================

/// Tasks accepted onto the queue.
pub static TASKS_QUEUED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("shipyard_tasks_queued_total", "Tasks accepted onto the queue").unwrap()
});

/// Tasks dropped because the queue was full or closed.
pub static TASKS_DROPPED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "shipyard_tasks_dropped_total",
        "Tasks dropped because the queue was full or closed",
    )
    .unwrap()
});

/// Finished tasks by outcome.
pub static TASKS_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("shipyard_tasks_finished_total", "Finished tasks by outcome"),
        &["outcome"], // "completed", "failed", "duplicate"
    )
    .unwrap()
});

/// Task execution duration in seconds.
pub static TASK_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "shipyard_task_duration_seconds",
            "Wall-clock duration of task execution",
        )
        .buckets(vec![1.0, 10.0, 30.0, 60.0, 300.0, 900.0, 1800.0, 3600.0]),
        &["outcome"],
    )
    .unwrap()
});

/// Tasks currently executing.
pub static TASKS_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("shipyard_tasks_running", "Tasks currently executing").unwrap()
});

// =============================================================================
// Autopilot Metrics
// =============================================================================

/// Stage transitions applied.
pub static AUTOPILOT_TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "shipyard_autopilot_transitions_total",
            "Pull-request stage transitions",
        ),
        &["from_stage", "to_stage"],
    )
    .unwrap()
});

/// PRs that ended in a failed stage.
pub static AUTOPILOT_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "shipyard_autopilot_failures_total",
        "Pull requests that ended in a failed stage",
    )
    .unwrap()
});

/// Fix issues opened for PRs whose CI failed.
pub static AUTOPILOT_FIX_ISSUES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "shipyard_autopilot_fix_issues_total",
        "Fix issues opened for pull requests whose CI failed",
    )
    .unwrap()
});

/// Transitions that could not be persisted.
pub static AUTOPILOT_PERSIST_ERRORS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "shipyard_autopilot_persist_errors_total",
        "Autopilot record writes that failed",
    )
    .unwrap()
});

/// PRs currently tracked.
pub static AUTOPILOT_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("shipyard_autopilot_active_prs", "Pull requests currently tracked").unwrap()
});

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Poller
        Box::new(POLLER_LISTINGS.clone()),
        Box::new(POLLER_DISPATCHED.clone()),
        Box::new(POLLER_HANDLER_FAILURES.clone()),
        // Orchestrator
        Box::new(TASKS_QUEUED.clone()),
        Box::new(TASKS_DROPPED.clone()),
        Box::new(TASKS_FINISHED.clone()),
        Box::new(TASK_DURATION.clone()),
        Box::new(TASKS_RUNNING.clone()),
        // Autopilot
        Box::new(AUTOPILOT_TRANSITIONS.clone()),
        Box::new(AUTOPILOT_FAILURES.clone()),
        Box::new(AUTOPILOT_FIX_ISSUES.clone()),
        Box::new(AUTOPILOT_PERSIST_ERRORS.clone()),
        Box::new(AUTOPILOT_ACTIVE.clone()),
    ]
}
