//! Executor backed by an external program.
//!
//! The program runs in the task's project directory with the task document
//! on stdin. It talks back through stdout, one directive per line:
//!
//! ```text
//! PROGRESS <percent> <step> <message...>
//! USAGE <input_tokens> <output_tokens>
//! PR <url>
//! COMMIT <sha>
//! ```
//!
//! Any other line is treated as plain output; a pull-request URL found in
//! plain output is picked up as well.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex_lite::Regex;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ExecutorConfig;

use super::hooks::{tail, BudgetGate, QualityCheckerFactory};
use super::types::{ExecutionResult, ExecutorError, ProgressSink, Task, TaskExecutor};

static PR_URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://[^\s]+/pulls?/\d+").unwrap());

/// Bytes of stderr kept in a failure message.
const STDERR_TAIL: usize = 500;

/// A parsed line of executor output.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutorLine {
    Progress {
        percent: u8,
        step: String,
        message: String,
    },
    Usage {
        input: i64,
        output: i64,
    },
    PullRequest(String),
    Commit(String),
    Output(String),
}

/// Parse one stdout line. Malformed directives fall back to `Output`.
pub fn parse_line(line: &str) -> ExecutorLine {
    let trimmed = line.trim();
    let (keyword, rest) = trimmed.split_once(' ').unwrap_or((trimmed, ""));
    let rest = rest.trim();

    match keyword {
        "PROGRESS" => {
            let mut parts = rest.splitn(3, ' ');
            let percent = parts.next().and_then(|p| p.parse::<u16>().ok());
            let step = parts.next();
            if let (Some(percent), Some(step)) = (percent, step) {
                return ExecutorLine::Progress {
                    percent: percent.min(100) as u8,
                    step: step.to_string(),
                    message: parts.next().unwrap_or("").trim().to_string(),
                };
            }
        }
        "USAGE" => {
            let mut parts = rest.split_whitespace();
            let input = parts.next().and_then(|p| p.parse::<i64>().ok());
            let output = parts.next().and_then(|p| p.parse::<i64>().ok());
            if let (Some(input), Some(output)) = (input, output) {
                return ExecutorLine::Usage { input, output };
            }
        }
        "PR" if !rest.is_empty() => return ExecutorLine::PullRequest(rest.to_string()),
        "COMMIT" if !rest.is_empty() => return ExecutorLine::Commit(rest.to_string()),
        _ => {}
    }
    ExecutorLine::Output(line.to_string())
}

fn find_pr_url(text: &str) -> Option<String> {
    PR_URL_RE.find(text).map(|m| m.as_str().to_string())
}

/// Runs a configured program once per task.
pub struct CommandExecutor {
    program: String,
    args: Vec<String>,
    budget: Option<BudgetGate>,
    quality: Option<QualityCheckerFactory>,
}

impl CommandExecutor {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            budget: None,
            quality: None,
        }
    }

    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self::new(config.program.clone(), config.args.clone())
    }

    /// Consult `gate` on every `USAGE` line; a refusal stops the task.
    pub fn with_budget(mut self, gate: BudgetGate) -> Self {
        self.budget = Some(gate);
        self
    }

    /// Run a quality check after each successful execution.
    pub fn with_quality(mut self, factory: QualityCheckerFactory) -> Self {
        self.quality = Some(factory);
        self
    }

    async fn run_quality_gate(
        &self,
        task: &Task,
        progress: &Arc<dyn ProgressSink>,
    ) -> Option<String> {
        let factory = self.quality.as_ref()?;
        let checker = factory(&task.id, &task.project_path)?;

        progress
            .report(&task.id, "quality", 95, "running quality checks")
            .await;
        match checker.check().await {
            Ok(report) if report.passed => None,
            Ok(report) => Some(format!(
                "quality gate failed ({}): {}",
                report.failed_check.unwrap_or_default(),
                report.output.trim()
            )),
            Err(e) => Some(e.to_string()),
        }
    }
}

#[async_trait]
impl TaskExecutor for CommandExecutor {
    async fn execute(
        &self,
        task: &Task,
        progress: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult, ExecutorError> {
        let started = Instant::now();
        info!(task_id = %task.id, program = %self.program, "Starting executor process");

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .current_dir(&task.project_path)
            .env("SHIPYARD_TASK_ID", &task.id)
            .env("SHIPYARD_TASK_TITLE", &task.title)
            .env("SHIPYARD_SOURCE_ID", &task.source_id)
            .env("SHIPYARD_BRANCH", &task.branch)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecutorError::Spawn(format!("{}: {}", self.program, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            let description = task.description.clone();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(description.as_bytes()).await {
                    debug!(error = %e, "Executor closed stdin early");
                }
            });
        }

        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = String::new();
                let _ = stderr.read_to_string(&mut buf).await;
                buf
            })
        });

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExecutorError::Spawn("stdout was not captured".to_string()))?;
        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();

        let mut pr_url: Option<String> = None;
        let mut commit_sha: Option<String> = None;
        let mut budget_exceeded = false;

        loop {
            buf.clear();
            let read = tokio::select! {
                _ = cancel.cancelled() => {
                    warn!(task_id = %task.id, "Execution cancelled, killing process");
                    let _ = child.kill().await;
                    return Err(ExecutorError::Cancelled);
                }
                read = reader.read_until(b'\n', &mut buf) => read?,
            };
            if read == 0 {
                break;
            }
            // Stray non-UTF-8 bytes in tool output must not abort the run.
            let raw = String::from_utf8_lossy(&buf);
            let line = raw.trim_end_matches(['\n', '\r']);

            match parse_line(line) {
                ExecutorLine::Progress {
                    percent,
                    step,
                    message,
                } => progress.report(&task.id, &step, percent, &message).await,
                ExecutorLine::Usage { input, output } => {
                    if let Some(gate) = &self.budget {
                        if !gate(&task.id, input, output) {
                            budget_exceeded = true;
                            let _ = child.kill().await;
                            break;
                        }
                    }
                }
                ExecutorLine::PullRequest(url) => pr_url = Some(url),
                ExecutorLine::Commit(sha) => commit_sha = Some(sha),
                ExecutorLine::Output(text) => {
                    if pr_url.is_none() {
                        pr_url = find_pr_url(&text);
                    }
                    debug!(task_id = %task.id, "{}", text);
                }
            }
        }

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(ExecutorError::Cancelled);
            }
            status = child.wait() => status?,
        };
        let duration = started.elapsed();

        if budget_exceeded {
            // Grandchildren may still hold stderr open.
            if let Some(handle) = stderr_task {
                handle.abort();
            }
            return Ok(ExecutionResult::failure("token budget exceeded").with_duration(duration));
        }
        let stderr = match stderr_task {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };
        if !status.success() {
            let detail = tail(stderr.trim(), STDERR_TAIL);
            let message = if detail.is_empty() {
                format!("executor exited with {}", status)
            } else {
                format!("executor exited with {}: {}", status, detail)
            };
            return Ok(ExecutionResult::failure(message).with_duration(duration));
        }

        if let Some(failure) = self.run_quality_gate(task, &progress).await {
            return Ok(ExecutionResult::failure(failure).with_duration(started.elapsed()));
        }

        Ok(ExecutionResult {
            success: true,
            error: None,
            pr_url,
            commit_sha,
            duration: started.elapsed(),
        })
    }
}
