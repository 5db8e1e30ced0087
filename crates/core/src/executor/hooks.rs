//! Budget and quality hooks consulted by executors.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{BudgetConfig, QualityConfig};

/// `(task_id, delta_input_tokens, delta_output_tokens) -> allowed`.
///
/// Returning `false` blocks further token consumption for that task.
pub type BudgetGate = Arc<dyn Fn(&str, i64, i64) -> bool + Send + Sync>;

/// Produces an optional post-execution checker for `(task_id, project_path)`.
pub type QualityCheckerFactory =
    Arc<dyn Fn(&str, &Path) -> Option<Box<dyn QualityChecker>> + Send + Sync>;

/// Per-task token accounting against fixed limits.
pub struct TokenBudget {
    max_input: i64,
    max_output: i64,
    usage: Mutex<HashMap<String, (i64, i64)>>,
}

impl TokenBudget {
    /// Limits of 0 or less are unlimited.
    pub fn new(max_input: i64, max_output: i64) -> Self {
        Self {
            max_input,
            max_output,
            usage: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &BudgetConfig) -> Self {
        Self::new(config.max_input_tokens, config.max_output_tokens)
    }

    /// Add a usage delta and report whether the task is still within budget.
    pub fn consume(&self, task_id: &str, input: i64, output: i64) -> bool {
        let mut usage = self.usage.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = usage.entry(task_id.to_string()).or_insert((0, 0));
        entry.0 += input.max(0);
        entry.1 += output.max(0);

        let over_input = self.max_input > 0 && entry.0 > self.max_input;
        let over_output = self.max_output > 0 && entry.1 > self.max_output;
        if over_input || over_output {
            warn!(
                task_id,
                input_tokens = entry.0,
                output_tokens = entry.1,
                "Task exceeded token budget"
            );
            return false;
        }
        true
    }

    /// Tokens consumed so far by a task as `(input, output)`.
    pub fn usage(&self, task_id: &str) -> (i64, i64) {
        self.usage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(task_id)
            .copied()
            .unwrap_or((0, 0))
    }

    pub fn reset(&self, task_id: &str) {
        self.usage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(task_id);
    }

    /// Expose this budget as a [`BudgetGate`].
    pub fn gate(self: &Arc<Self>) -> BudgetGate {
        let budget = Arc::clone(self);
        Arc::new(move |task_id: &str, input: i64, output: i64| {
            budget.consume(task_id, input, output)
        })
    }
}

/// Result of a quality check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub passed: bool,
    /// Name of the first failing check, if any.
    pub failed_check: Option<String>,
    /// Tail of the failing check's output.
    pub output: String,
}

impl QualityReport {
    pub fn passed() -> Self {
        Self {
            passed: true,
            failed_check: None,
            output: String::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum QualityError {
    #[error("failed to run quality check '{check}': {message}")]
    Spawn { check: String, message: String },
}

/// Runs after a successful execution; a failing report fails the task.
#[async_trait]
pub trait QualityChecker: Send + Sync {
    async fn check(&self) -> Result<QualityReport, QualityError>;
}

/// Runs shell commands in the project directory; all must exit 0.
pub struct CommandQualityChecker {
    commands: Vec<String>,
    project_path: PathBuf,
}

/// Bytes of failing output kept in a report.
const OUTPUT_TAIL: usize = 2000;

impl CommandQualityChecker {
    pub fn new(commands: Vec<String>, project_path: impl Into<PathBuf>) -> Self {
        Self {
            commands,
            project_path: project_path.into(),
        }
    }

    /// Factory producing a checker per task, or none when disabled or empty.
    pub fn factory(config: &QualityConfig) -> QualityCheckerFactory {
        let enabled = config.enabled && !config.commands.is_empty();
        let commands = config.commands.clone();
        Arc::new(move |_task_id: &str, project_path: &Path| {
            if !enabled {
                return None;
            }
            Some(Box::new(CommandQualityChecker::new(commands.clone(), project_path))
                as Box<dyn QualityChecker>)
        })
    }
}

#[async_trait]
impl QualityChecker for CommandQualityChecker {
    async fn check(&self) -> Result<QualityReport, QualityError> {
        for command in &self.commands {
            debug!(command = %command, path = %self.project_path.display(), "Running quality check");
            let output = tokio::process::Command::new("sh")
                .arg("-c")
                .arg(command)
                .current_dir(&self.project_path)
                .output()
                .await
                .map_err(|e| QualityError::Spawn {
                    check: command.clone(),
                    message: e.to_string(),
                })?;

            if !output.status.success() {
                let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
                text.push_str(&String::from_utf8_lossy(&output.stderr));
                return Ok(QualityReport {
                    passed: false,
                    failed_check: Some(command.clone()),
                    output: tail(&text, OUTPUT_TAIL),
                });
            }
        }
        Ok(QualityReport::passed())
    }
}

/// Last `max` bytes of `text`, cut on a char boundary.
pub(crate) fn tail(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}
