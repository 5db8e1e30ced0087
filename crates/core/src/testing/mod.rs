//! Testing utilities and mock implementations.
//!
//! Mocks for every collaborator trait, so the poller, orchestrator and
//! autopilot can be exercised without GitHub or a real executor.
//!
//! # Example
//!
//! ```rust,ignore
//! use shipyard_core::testing::{fixtures, MockExecutor, MockWorkSource};
//!
//! let source = MockWorkSource::new();
//! source.set_items(vec![fixtures::work_item("1")]);
//!
//! let executor = MockExecutor::new().with_delay(Duration::from_millis(50));
//! executor.set_result("task-1", ExecutionResult::failure("build failed"));
//! ```

mod mock_executor;
mod mock_host;
mod mock_notifier;
mod mock_source;
mod mock_store;

pub use mock_executor::MockExecutor;
pub use mock_host::MockPullRequestHost;
pub use mock_notifier::{MockFinishListener, MockNotifier, MockPrListener};
pub use mock_source::MockWorkSource;
pub use mock_store::FlakyRecordStore;

use std::time::Duration;

/// Poll `condition` every 10ms until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::path::PathBuf;

    use chrono::{Duration, TimeZone, Utc};

    use crate::executor::Task;
    use crate::orchestrator::PrCreated;
    use crate::source::WorkItem;

    /// Work item labelled `shipyard`, created at a fixed time offset by its
    /// numeric id so ordering by age is deterministic.
    pub fn work_item(id: &str) -> WorkItem {
        let offset = id.parse::<i64>().unwrap_or(0);
        WorkItem {
            id: id.to_string(),
            title: format!("Work item {}", id),
            body: String::new(),
            labels: vec!["shipyard".to_string()],
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                + Duration::minutes(offset),
        }
    }

    /// Task whose id is exactly `id`.
    pub fn task(id: &str) -> Task {
        Task {
            id: id.to_string(),
            source_id: id.to_string(),
            title: format!("Task {}", id),
            description: format!("# Task {}\n", id),
            project_path: PathBuf::from("."),
            branch: format!("shipyard/{}", id),
            priority: 0.0,
        }
    }

    /// PR event whose head commit is `sha-<n>`.
    pub fn pr_created(number: u64) -> PrCreated {
        PrCreated {
            pr_number: number,
            pr_url: format!("https://github.com/acme/app/pull/{}", number),
            source_id: format!("{}", number + 1000),
            task_id: format!("task-{}", number),
            commit_sha: Some(format!("sha-{}", number)),
            branch: format!("shipyard/{}", number + 1000),
        }
    }
}
