//! In-memory task lifecycle registry.
//!
//! The monitor is rebuilt from live orchestrator activity on every start;
//! nothing here is persisted.

mod registry;
mod types;

pub use registry::Monitor;
pub use types::{TaskPhase, TaskState};
