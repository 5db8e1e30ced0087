//! Orchestrator configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the task orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Number of workers draining the queue.
    /// This bounds how many tasks execute at once.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Queue capacity. Tasks queued while the queue is full are dropped.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Notifiers receive progress only at multiples of this percentage.
    #[serde(default = "default_progress_step")]
    pub progress_notify_step: u8,

    /// Working copy tasks run against.
    #[serde(default = "default_project_path")]
    pub project_path: PathBuf,

    /// Prefix for task branches (`<prefix>/<item id>`).
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,
}

fn default_max_workers() -> usize {
    2
}

fn default_queue_capacity() -> usize {
    100
}

fn default_progress_step() -> u8 {
    25
}

fn default_project_path() -> PathBuf {
    PathBuf::from(".")
}

fn default_branch_prefix() -> String {
    "shipyard".to_string()
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            queue_capacity: default_queue_capacity(),
            progress_notify_step: default_progress_step(),
            project_path: default_project_path(),
            branch_prefix: default_branch_prefix(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_workers, 2);
        assert_eq!(config.queue_capacity, 100);
        assert_eq!(config.progress_notify_step, 25);
        assert_eq!(config.branch_prefix, "shipyard");
    }

    #[test]
    fn test_deserialize_minimal() {
        let config: OrchestratorConfig = toml::from_str("max_workers = 4").unwrap();
        assert_eq!(config.max_workers, 4);
        assert_eq!(config.queue_capacity, 100);
    }

    #[test]
    fn test_deserialize_full() {
        let toml = r#"
            max_workers = 3
            queue_capacity = 10
            progress_notify_step = 50
            project_path = "/srv/repo"
            branch_prefix = "bot"
        "#;
        let config: OrchestratorConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.max_workers, 3);
        assert_eq!(config.queue_capacity, 10);
        assert_eq!(config.progress_notify_step, 50);
        assert_eq!(config.project_path, PathBuf::from("/srv/repo"));
        assert_eq!(config.branch_prefix, "bot");
    }
}
