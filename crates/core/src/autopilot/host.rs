//! The pull-request host as seen by autopilot.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::config::MergeMethod;
use super::feedback::NewIssue;
use super::types::CiStatus;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited until {reset_at}")]
    RateLimited { reset_at: DateTime<Utc> },
}

impl HostError {
    /// The host answered, so the request had no effect. A transport error
    /// leaves that unknown.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, HostError::Request(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrState {
    Open,
    Closed,
}

/// Live view of a pull request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrSnapshot {
    pub number: u64,
    pub state: PrState,
    pub merged: bool,
    /// `None` while the host is still computing mergeability.
    pub mergeable: Option<bool>,
    pub head_sha: String,
    pub merge_commit_sha: Option<String>,
    pub title: String,
}

/// Entry in the list of open pull requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrSummary {
    pub number: u64,
    pub url: String,
    pub head_ref: String,
    pub head_sha: String,
}

/// Operations autopilot needs from the code host.
#[async_trait]
pub trait PullRequestHost: Send + Sync {
    async fn pull_request(&self, number: u64) -> Result<PrSnapshot, HostError>;

    async fn list_open_pull_requests(&self) -> Result<Vec<PrSummary>, HostError>;

    async fn close_pull_request(&self, number: u64) -> Result<(), HostError>;

    /// Commit messages of a PR, oldest first.
    async fn commit_messages(&self, number: u64) -> Result<Vec<String>, HostError>;

    /// Combined CI status for a commit.
    async fn ci_status(&self, sha: &str) -> Result<CiStatus, HostError>;

    /// Names of the checks that failed on a commit.
    async fn failed_checks(&self, sha: &str) -> Result<Vec<String>, HostError>;

    /// Whether the PR already has an approving review.
    async fn has_approval(&self, number: u64) -> Result<bool, HostError>;

    /// Submit an approving review.
    async fn approve(&self, number: u64) -> Result<(), HostError>;

    /// Merge, refusing if the head moved away from `sha`.
    async fn merge(&self, number: u64, method: MergeMethod, sha: &str) -> Result<(), HostError>;

    /// Highest-sorting tag that starts with `prefix`, if any.
    async fn latest_tag(&self, prefix: &str) -> Result<Option<String>, HostError>;

    /// Tag already pointing at `sha`, if any.
    async fn tag_for_sha(&self, sha: &str) -> Result<Option<String>, HostError>;

    async fn create_tag(&self, tag: &str, sha: &str) -> Result<(), HostError>;

    /// Body of an issue; empty if it has none.
    async fn issue_body(&self, number: u64) -> Result<String, HostError>;

    /// Open an issue and return its number.
    async fn create_issue(&self, issue: &NewIssue) -> Result<u64, HostError>;
}
