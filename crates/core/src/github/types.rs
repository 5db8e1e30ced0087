//! GitHub REST API payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::autopilot::{CiStatus, PrSnapshot, PrState, PrSummary};
use crate::source::WorkItem;

#[derive(Debug, Clone, Deserialize)]
pub struct Label {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub labels: Vec<Label>,
    pub created_at: DateTime<Utc>,
    /// Present when the "issue" is actually a pull request.
    #[serde(default)]
    pub pull_request: Option<serde_json::Value>,
}

impl Issue {
    pub fn is_pull_request(&self) -> bool {
        self.pull_request.is_some()
    }
}

impl From<Issue> for WorkItem {
    fn from(issue: Issue) -> Self {
        WorkItem {
            id: issue.number.to_string(),
            title: issue.title,
            body: issue.body.unwrap_or_default(),
            labels: issue.labels.into_iter().map(|l| l.name).collect(),
            created_at: issue.created_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitRef {
    pub sha: String,
    /// Branch name.
    #[serde(rename = "ref", default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    /// "open" or "closed".
    pub state: String,
    #[serde(default)]
    pub merged: bool,
    #[serde(default)]
    pub mergeable: Option<bool>,
    pub head: GitRef,
    #[serde(default)]
    pub merge_commit_sha: Option<String>,
    #[serde(default)]
    pub html_url: String,
}

impl From<PullRequest> for PrSummary {
    fn from(pr: PullRequest) -> Self {
        PrSummary {
            number: pr.number,
            url: pr.html_url,
            head_ref: pr.head.name,
            head_sha: pr.head.sha,
        }
    }
}

impl From<PullRequest> for PrSnapshot {
    fn from(pr: PullRequest) -> Self {
        PrSnapshot {
            number: pr.number,
            state: if pr.state == "open" {
                PrState::Open
            } else {
                PrState::Closed
            },
            merged: pr.merged,
            mergeable: pr.mergeable,
            head_sha: pr.head.sha,
            merge_commit_sha: pr.merge_commit_sha,
            title: pr.title,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckRun {
    pub name: String,
    /// "queued", "in_progress" or "completed".
    pub status: String,
    #[serde(default)]
    pub conclusion: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckRunsResponse {
    #[serde(default)]
    pub check_runs: Vec<CheckRun>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusEntry {
    pub state: String,
    #[serde(default)]
    pub context: String,
}

/// Legacy commit statuses, combined.
#[derive(Debug, Clone, Deserialize)]
pub struct CombinedStatus {
    /// "success", "failure", "error" or "pending".
    pub state: String,
    #[serde(default)]
    pub statuses: Vec<StatusEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TagCommit {
    pub sha: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Tag {
    pub name: String,
    pub commit: TagCommit,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Review {
    /// "APPROVED", "CHANGES_REQUESTED", "COMMENTED", ...
    pub state: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitDetail {
    pub message: String,
}

/// Entry of `GET /pulls/{n}/commits`.
#[derive(Debug, Clone, Deserialize)]
pub struct PrCommit {
    pub commit: CommitDetail,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ReviewRequest<'a> {
    pub event: &'a str,
}

#[derive(Debug, Serialize)]
pub struct MergeRequest<'a> {
    pub merge_method: &'a str,
    pub sha: &'a str,
}

#[derive(Debug, Serialize)]
pub struct CreateIssueRequest<'a> {
    pub title: &'a str,
    pub body: &'a str,
    pub labels: &'a [String],
}

#[derive(Debug, Serialize)]
pub struct LabelsRequest<'a> {
    pub labels: [&'a str; 1],
}

#[derive(Debug, Serialize)]
pub struct UpdatePullRequest<'a> {
    pub state: &'a str,
}

#[derive(Debug, Serialize)]
pub struct CreateRefRequest {
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub sha: String,
}

fn run_failed(run: &CheckRun) -> bool {
    run.status == "completed"
        && matches!(
            run.conclusion.as_deref(),
            Some("failure" | "timed_out" | "cancelled" | "action_required" | "startup_failure")
        )
}

fn status_failed(entry: &StatusEntry) -> bool {
    entry.state == "failure" || entry.state == "error"
}

/// Names of failed check runs and failed commit-status contexts.
pub fn failed_check_names(check_runs: &[CheckRun], combined: &CombinedStatus) -> Vec<String> {
    check_runs
        .iter()
        .filter(|r| run_failed(r))
        .map(|r| r.name.clone())
        .chain(
            combined
                .statuses
                .iter()
                .filter(|s| status_failed(s))
                .map(|s| s.context.clone()),
        )
        .collect()
}

/// Fold check runs and commit statuses into one CI status.
///
/// Any failure wins, then anything still running. No checks at all counts
/// as pending.
pub fn combine_ci(check_runs: &[CheckRun], combined: &CombinedStatus) -> CiStatus {
    if check_runs.iter().any(run_failed) || combined.statuses.iter().any(status_failed) {
        return CiStatus::Failure;
    }

    let run_active = check_runs.iter().any(|r| r.status != "completed");
    let status_active = combined.statuses.iter().any(|s| s.state == "pending");
    if run_active || status_active {
        return CiStatus::Running;
    }

    if check_runs.is_empty() && combined.statuses.is_empty() {
        return CiStatus::Pending;
    }
    CiStatus::Success
}
