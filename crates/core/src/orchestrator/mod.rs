//! Task orchestrator.
//!
//! Owns a bounded task queue drained by a fixed pool of workers:
//! - **Queueing**: best-effort; a full queue drops the task with a warning
//! - **Execution**: one worker per task for its whole run, never two workers
//!   on the same task id
//! - **Reporting**: progress and outcomes flow to the [`Monitor`](crate::monitor::Monitor),
//!   progress callbacks, notifiers, pull-request listeners and finish listeners

mod config;
mod planner;
mod progress;
mod runner;
mod types;

pub use config::OrchestratorConfig;
pub use planner::{extract_pr_number, DefaultPlanner, DispatchHandler, TaskPlanner};
pub use runner::Orchestrator;
pub use types::{
    OrchestratorError, OrchestratorStatus, PrCreated, PrCreatedListener, ProgressCallback,
    TaskFinishedListener, TaskOutcome,
};
