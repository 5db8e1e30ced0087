//! Pull-request autopilot.
//!
//! Once a task opens a pull request, the controller follows it through
//! `created → ci_pending → ci_passed → reviewing → merging → merged →
//! released`, stopping at `ci_failed`, `merge_failed` or `release_failed`
//! when something goes wrong. A PR whose CI fails is closed and replaced by
//! a fix issue. Records are persisted through a [`RecordStore`] so tracking
//! survives restarts.

mod config;
mod controller;
mod feedback;
mod host;
mod release;
mod sqlite_store;
mod store;
mod types;

pub use config::{AutopilotConfig, FeedbackConfig, MergeMethod, ReleaseConfig};
pub use controller::AutopilotController;
pub use feedback::{fix_issue, parse_iteration, NewIssue};
pub use host::{HostError, PrSnapshot, PrState, PrSummary, PullRequestHost};
pub use release::{bump_for_message, detect_bump, highest_tag, next_tag, Bump, SemVer};
pub use sqlite_store::SqliteRecordStore;
pub use store::{InMemoryRecordStore, RecordStore, StoreError};
pub use types::{AutopilotError, AutopilotRecord, CiStatus, PrStage};
