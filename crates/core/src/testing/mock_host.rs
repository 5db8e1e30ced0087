//! Mock pull-request host.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::autopilot::{
    highest_tag, CiStatus, HostError, MergeMethod, NewIssue, PrSnapshot, PrState, PrSummary,
    PullRequestHost,
};

/// First number handed out by [`PullRequestHost::create_issue`].
const FIRST_ISSUE_NUMBER: u64 = 500;

/// In-memory PR host.
///
/// Unknown PRs and issues return [`HostError::NotFound`]; unknown commits
/// report [`CiStatus::Pending`]. A successful merge marks the PR merged with
/// merge commit `merge-<n>`. PRs have no commits unless set, so the title
/// alone decides the release bump.
#[derive(Default)]
pub struct MockPullRequestHost {
    prs: Mutex<HashMap<u64, PrSnapshot>>,
    branches: Mutex<HashMap<u64, String>>,
    commits: Mutex<HashMap<u64, Vec<String>>>,
    ci: Mutex<HashMap<String, CiStatus>>,
    failed_checks: Mutex<HashMap<String, Vec<String>>>,
    /// `(tag, sha)`, oldest first.
    tags: Mutex<Vec<(String, String)>>,
    issue_bodies: Mutex<HashMap<u64, String>>,
    merge_error: Mutex<Option<String>>,
    issue_error: Mutex<Option<String>>,
    approvals: Mutex<Vec<u64>>,
    merges: Mutex<Vec<u64>>,
    closed: Mutex<Vec<u64>>,
    created_tags: Mutex<Vec<(String, String)>>,
    created_issues: Mutex<Vec<(u64, NewIssue)>>,
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockPullRequestHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open, mergeable PR with head `sha-<n>` on branch `shipyard/<n + 1000>`,
    /// matching [`fixtures::pr_created`](super::fixtures::pr_created).
    pub fn add_open_pr(&self, number: u64) {
        lock(&self.prs).insert(
            number,
            PrSnapshot {
                number,
                state: PrState::Open,
                merged: false,
                mergeable: Some(true),
                head_sha: format!("sha-{}", number),
                merge_commit_sha: None,
                title: format!("feat: change {}", number),
            },
        );
        lock(&self.branches).insert(number, format!("shipyard/{}", number + 1000));
    }

    pub fn update_pr(&self, number: u64, update: impl FnOnce(&mut PrSnapshot)) {
        if let Some(pr) = lock(&self.prs).get_mut(&number) {
            update(pr);
        }
    }

    pub fn set_branch(&self, number: u64, branch: &str) {
        lock(&self.branches).insert(number, branch.to_string());
    }

    pub fn mark_merged(&self, number: u64) {
        self.update_pr(number, |pr| {
            pr.merged = true;
            pr.state = PrState::Closed;
            pr.merge_commit_sha = Some(format!("merge-{}", number));
        });
    }

    pub fn set_commit_messages(&self, number: u64, messages: &[&str]) {
        lock(&self.commits).insert(number, messages.iter().map(|m| m.to_string()).collect());
    }

    pub fn set_ci_status(&self, sha: &str, status: CiStatus) {
        lock(&self.ci).insert(sha.to_string(), status);
    }

    pub fn set_failed_checks(&self, sha: &str, checks: &[&str]) {
        lock(&self.failed_checks).insert(
            sha.to_string(),
            checks.iter().map(|c| c.to_string()).collect(),
        );
    }

    /// Replace all tags; they point at no known commit.
    pub fn set_tags(&self, tags: Vec<String>) {
        *lock(&self.tags) = tags.into_iter().map(|t| (t, String::new())).collect();
    }

    pub fn add_tag(&self, tag: &str, sha: &str) {
        lock(&self.tags).push((tag.to_string(), sha.to_string()));
    }

    pub fn set_issue_body(&self, number: u64, body: &str) {
        lock(&self.issue_bodies).insert(number, body.to_string());
    }

    /// Make every merge call fail with this message (or succeed with `None`).
    pub fn set_merge_error(&self, message: Option<&str>) {
        *lock(&self.merge_error) = message.map(str::to_string);
    }

    /// Make issue creation fail with a 422 carrying this message.
    pub fn set_issue_error(&self, message: Option<&str>) {
        *lock(&self.issue_error) = message.map(str::to_string);
    }

    pub fn approvals(&self) -> Vec<u64> {
        lock(&self.approvals).clone()
    }

    pub fn merges(&self) -> Vec<u64> {
        lock(&self.merges).clone()
    }

    /// PRs closed through the host.
    pub fn closed(&self) -> Vec<u64> {
        lock(&self.closed).clone()
    }

    /// `(tag, sha)` pairs created so far.
    pub fn created_tags(&self) -> Vec<(String, String)> {
        lock(&self.created_tags).clone()
    }

    /// Issues opened so far with the numbers they were given.
    pub fn created_issues(&self) -> Vec<(u64, NewIssue)> {
        lock(&self.created_issues).clone()
    }
}

#[async_trait]
impl PullRequestHost for MockPullRequestHost {
    async fn pull_request(&self, number: u64) -> Result<PrSnapshot, HostError> {
        lock(&self.prs)
            .get(&number)
            .cloned()
            .ok_or_else(|| HostError::NotFound(format!("pull request #{}", number)))
    }

    async fn list_open_pull_requests(&self) -> Result<Vec<PrSummary>, HostError> {
        let branches = lock(&self.branches).clone();
        let mut open: Vec<PrSummary> = lock(&self.prs)
            .values()
            .filter(|pr| pr.state == PrState::Open)
            .map(|pr| PrSummary {
                number: pr.number,
                url: format!("https://github.com/acme/app/pull/{}", pr.number),
                head_ref: branches.get(&pr.number).cloned().unwrap_or_default(),
                head_sha: pr.head_sha.clone(),
            })
            .collect();
        open.sort_by_key(|pr| pr.number);
        Ok(open)
    }

    async fn close_pull_request(&self, number: u64) -> Result<(), HostError> {
        let mut prs = lock(&self.prs);
        let pr = prs
            .get_mut(&number)
            .ok_or_else(|| HostError::NotFound(format!("pull request #{}", number)))?;
        pr.state = PrState::Closed;
        lock(&self.closed).push(number);
        Ok(())
    }

    async fn commit_messages(&self, number: u64) -> Result<Vec<String>, HostError> {
        Ok(lock(&self.commits).get(&number).cloned().unwrap_or_default())
    }

    async fn ci_status(&self, sha: &str) -> Result<CiStatus, HostError> {
        Ok(lock(&self.ci).get(sha).copied().unwrap_or_default())
    }

    async fn failed_checks(&self, sha: &str) -> Result<Vec<String>, HostError> {
        Ok(lock(&self.failed_checks)
            .get(sha)
            .cloned()
            .unwrap_or_default())
    }

    async fn has_approval(&self, number: u64) -> Result<bool, HostError> {
        Ok(lock(&self.approvals).contains(&number))
    }

    async fn approve(&self, number: u64) -> Result<(), HostError> {
        lock(&self.approvals).push(number);
        Ok(())
    }

    async fn merge(&self, number: u64, _method: MergeMethod, _sha: &str) -> Result<(), HostError> {
        if let Some(message) = lock(&self.merge_error).clone() {
            return Err(HostError::Api {
                status: 405,
                message,
            });
        }
        lock(&self.merges).push(number);
        self.mark_merged(number);
        Ok(())
    }

    async fn latest_tag(&self, prefix: &str) -> Result<Option<String>, HostError> {
        let tags = lock(&self.tags).clone();
        Ok(highest_tag(tags.iter().map(|(t, _)| t.as_str()), prefix))
    }

    async fn tag_for_sha(&self, sha: &str) -> Result<Option<String>, HostError> {
        Ok(lock(&self.tags)
            .iter()
            .find(|(_, s)| s == sha)
            .map(|(t, _)| t.clone()))
    }

    async fn create_tag(&self, tag: &str, sha: &str) -> Result<(), HostError> {
        let mut tags = lock(&self.tags);
        if tags.iter().any(|(t, _)| t == tag) {
            return Err(HostError::Api {
                status: 422,
                message: "Reference already exists".to_string(),
            });
        }
        tags.push((tag.to_string(), sha.to_string()));
        lock(&self.created_tags).push((tag.to_string(), sha.to_string()));
        Ok(())
    }

    async fn issue_body(&self, number: u64) -> Result<String, HostError> {
        lock(&self.issue_bodies)
            .get(&number)
            .cloned()
            .ok_or_else(|| HostError::NotFound(format!("issue #{}", number)))
    }

    async fn create_issue(&self, issue: &NewIssue) -> Result<u64, HostError> {
        if let Some(message) = lock(&self.issue_error).clone() {
            return Err(HostError::Api {
                status: 422,
                message,
            });
        }
        let mut created = lock(&self.created_issues);
        let number = FIRST_ISSUE_NUMBER + created.len() as u64;
        created.push((number, issue.clone()));
        lock(&self.issue_bodies).insert(number, issue.body.clone());
        Ok(number)
    }
}
