//! GitHub REST client.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::autopilot::{
    highest_tag, CiStatus, HostError, MergeMethod, NewIssue, PrSnapshot, PrSummary,
    PullRequestHost,
};
use crate::config::GithubConfig;
use crate::source::{ItemLabeler, SourceError, WorkItem, WorkSource};

use super::types::{
    combine_ci, failed_check_names, ApiErrorBody, CheckRunsResponse, CombinedStatus,
    CreateIssueRequest, CreateRefRequest, Issue, LabelsRequest, MergeRequest, PrCommit,
    PullRequest, Review, ReviewRequest, Tag, UpdatePullRequest,
};
use super::GithubError;

const PER_PAGE: usize = 100;
/// Listing stops after this many pages.
const MAX_PAGES: u32 = 10;
const API_VERSION: &str = "2022-11-28";

/// Client for one repository.
pub struct GithubClient {
    client: Client,
    api_url: String,
    owner: String,
    repo: String,
    token: String,
    label: String,
}

impl GithubClient {
    pub fn new(config: &GithubConfig) -> Result<Self, GithubError> {
        let (owner, repo) = config.owner_and_name().ok_or_else(|| {
            GithubError::NotConfigured(format!(
                "repo must be in owner/name form, got '{}'",
                config.repo
            ))
        })?;
        if config.token.is_empty() {
            return Err(GithubError::NotConfigured("token is required".to_string()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs as u64))
            .build()?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            owner: owner.to_string(),
            repo: repo.to_string(),
            token: config.token.clone(),
            label: config.label.clone(),
        })
    }

    fn repo_url(&self, path: &str) -> String {
        format!("{}/repos/{}/{}{}", self.api_url, self.owner, self.repo, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .header(ACCEPT, "application/vnd.github+json")
            .header(USER_AGENT, "shipyard")
            .header("X-GitHub-Api-Version", API_VERSION)
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response, GithubError> {
        let response = self.authorized(request).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if let Some(reset_at) = rate_limit_reset(status, response.headers()) {
            return Err(GithubError::RateLimited { reset_at });
        }
        if status == StatusCode::NOT_FOUND {
            return Err(GithubError::NotFound(what.to_string()));
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&body)
            .map(|b| b.message)
            .unwrap_or(body);
        Err(GithubError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        what: &str,
    ) -> Result<T, GithubError> {
        let response = self.send(self.client.get(url).query(query), what).await?;
        response
            .json()
            .await
            .map_err(|e| GithubError::Parse(format!("{}: {}", what, e)))
    }

    /// Open issues carrying the configured label, pull requests excluded.
    pub async fn list_open_issues(&self) -> Result<Vec<Issue>, GithubError> {
        let url = self.repo_url("/issues");
        let mut issues = Vec::new();

        for page in 1..=MAX_PAGES {
            let query = [
                ("state", "open".to_string()),
                ("labels", self.label.clone()),
                ("per_page", PER_PAGE.to_string()),
                ("page", page.to_string()),
            ];
            let batch: Vec<Issue> = self.get_json(&url, &query, "issues").await?;
            let done = batch.len() < PER_PAGE;
            issues.extend(batch.into_iter().filter(|i| !i.is_pull_request()));
            if done {
                break;
            }
        }

        debug!(count = issues.len(), label = %self.label, "Listed open issues");
        Ok(issues)
    }

    pub async fn get_pull_request(&self, number: u64) -> Result<PullRequest, GithubError> {
        let url = self.repo_url(&format!("/pulls/{}", number));
        self.get_json(&url, &[], &format!("pull request #{}", number))
            .await
    }

    /// Open pull requests, oldest first.
    pub async fn list_open_pulls(&self) -> Result<Vec<PullRequest>, GithubError> {
        let url = self.repo_url("/pulls");
        let mut pulls = Vec::new();

        for page in 1..=MAX_PAGES {
            let query = [
                ("state", "open".to_string()),
                ("sort", "created".to_string()),
                ("direction", "asc".to_string()),
                ("per_page", PER_PAGE.to_string()),
                ("page", page.to_string()),
            ];
            let batch: Vec<PullRequest> = self.get_json(&url, &query, "pull requests").await?;
            let done = batch.len() < PER_PAGE;
            pulls.extend(batch);
            if done {
                break;
            }
        }
        Ok(pulls)
    }

    /// Check runs and legacy statuses for a commit sha or ref name.
    async fn commit_checks(
        &self,
        sha: &str,
    ) -> Result<(CheckRunsResponse, CombinedStatus), GithubError> {
        let what = format!("commit {}", sha);
        let sha = urlencoding::encode(sha);
        let runs: CheckRunsResponse = self
            .get_json(
                &self.repo_url(&format!("/commits/{}/check-runs", sha)),
                &[("per_page", PER_PAGE.to_string())],
                &what,
            )
            .await?;
        let statuses: CombinedStatus = self
            .get_json(
                &self.repo_url(&format!("/commits/{}/status", sha)),
                &[],
                &what,
            )
            .await?;
        Ok((runs, statuses))
    }

    /// CI verdict for a commit sha or ref name.
    pub async fn combined_ci_status(&self, sha: &str) -> Result<CiStatus, GithubError> {
        let (runs, statuses) = self.commit_checks(sha).await?;
        Ok(combine_ci(&runs.check_runs, &statuses))
    }

    /// Most recent tags (first page only).
    pub async fn list_tags(&self) -> Result<Vec<Tag>, GithubError> {
        self.get_json(
            &self.repo_url("/tags"),
            &[("per_page", PER_PAGE.to_string())],
            "tags",
        )
        .await
    }

    pub async fn get_issue(&self, number: u64) -> Result<Issue, GithubError> {
        let url = self.repo_url(&format!("/issues/{}", number));
        self.get_json(&url, &[], &format!("issue #{}", number)).await
    }

    pub async fn add_issue_label(&self, number: u64, label: &str) -> Result<(), GithubError> {
        let url = self.repo_url(&format!("/issues/{}/labels", number));
        let body = LabelsRequest { labels: [label] };
        self.send(
            self.client.post(&url).json(&body),
            &format!("issue #{}", number),
        )
        .await?;
        Ok(())
    }

    /// Remove a label; a label the issue doesn't carry is fine.
    pub async fn remove_issue_label(&self, number: u64, label: &str) -> Result<(), GithubError> {
        let url = self.repo_url(&format!(
            "/issues/{}/labels/{}",
            number,
            urlencoding::encode(label)
        ));
        match self
            .send(self.client.delete(&url), &format!("label {}", label))
            .await
        {
            Ok(_) | Err(GithubError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Issue number from a work item id.
fn issue_number(item_id: &str) -> Result<u64, SourceError> {
    item_id
        .parse()
        .map_err(|_| SourceError::Parse(format!("not an issue number: {}", item_id)))
}

/// Back-off deadline for a rate-limited response, if it is one.
///
/// GitHub signals primary limits with `x-ratelimit-remaining: 0` plus
/// `x-ratelimit-reset` (epoch seconds) and secondary limits with
/// `retry-after` (seconds).
pub fn rate_limit_reset(status: StatusCode, headers: &HeaderMap) -> Option<DateTime<Utc>> {
    if status != StatusCode::FORBIDDEN && status != StatusCode::TOO_MANY_REQUESTS {
        return None;
    }

    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    if let Some(secs) = header("retry-after").and_then(|v| v.trim().parse::<i64>().ok()) {
        return Some(Utc::now() + chrono::Duration::seconds(secs));
    }
    if header("x-ratelimit-remaining") == Some("0") {
        if let Some(reset) = header("x-ratelimit-reset")
            .and_then(|v| v.trim().parse::<i64>().ok())
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        {
            return Some(reset);
        }
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Some(Utc::now() + chrono::Duration::seconds(60));
    }
    None
}

#[async_trait]
impl WorkSource for GithubClient {
    fn name(&self) -> &str {
        "github"
    }

    async fn list_open_items(&self) -> Result<Vec<WorkItem>, SourceError> {
        let issues = self.list_open_issues().await?;
        Ok(issues.into_iter().map(WorkItem::from).collect())
    }
}

#[async_trait]
impl ItemLabeler for GithubClient {
    async fn add_label(&self, item_id: &str, label: &str) -> Result<(), SourceError> {
        Ok(self.add_issue_label(issue_number(item_id)?, label).await?)
    }

    async fn remove_label(&self, item_id: &str, label: &str) -> Result<(), SourceError> {
        Ok(self.remove_issue_label(issue_number(item_id)?, label).await?)
    }
}

#[async_trait]
impl PullRequestHost for GithubClient {
    async fn pull_request(&self, number: u64) -> Result<PrSnapshot, HostError> {
        Ok(self.get_pull_request(number).await?.into())
    }

    async fn list_open_pull_requests(&self) -> Result<Vec<PrSummary>, HostError> {
        let pulls = self.list_open_pulls().await?;
        Ok(pulls.into_iter().map(PrSummary::from).collect())
    }

    async fn close_pull_request(&self, number: u64) -> Result<(), HostError> {
        let url = self.repo_url(&format!("/pulls/{}", number));
        self.send(
            self.client
                .patch(&url)
                .json(&UpdatePullRequest { state: "closed" }),
            &format!("pull request #{}", number),
        )
        .await?;
        Ok(())
    }

    async fn commit_messages(&self, number: u64) -> Result<Vec<String>, HostError> {
        let commits: Vec<PrCommit> = self
            .get_json(
                &self.repo_url(&format!("/pulls/{}/commits", number)),
                &[("per_page", PER_PAGE.to_string())],
                &format!("pull request #{}", number),
            )
            .await?;
        Ok(commits.into_iter().map(|c| c.commit.message).collect())
    }

    async fn ci_status(&self, sha: &str) -> Result<CiStatus, HostError> {
        Ok(self.combined_ci_status(sha).await?)
    }

    async fn failed_checks(&self, sha: &str) -> Result<Vec<String>, HostError> {
        let (runs, statuses) = self.commit_checks(sha).await?;
        Ok(failed_check_names(&runs.check_runs, &statuses))
    }

    async fn has_approval(&self, number: u64) -> Result<bool, HostError> {
        let reviews: Vec<Review> = self
            .get_json(
                &self.repo_url(&format!("/pulls/{}/reviews", number)),
                &[("per_page", PER_PAGE.to_string())],
                &format!("pull request #{}", number),
            )
            .await?;
        Ok(reviews.iter().any(|r| r.state == "APPROVED"))
    }

    async fn approve(&self, number: u64) -> Result<(), HostError> {
        let url = self.repo_url(&format!("/pulls/{}/reviews", number));
        let body = ReviewRequest { event: "APPROVE" };
        self.send(
            self.client.post(&url).json(&body),
            &format!("pull request #{}", number),
        )
        .await?;
        Ok(())
    }

    async fn merge(&self, number: u64, method: MergeMethod, sha: &str) -> Result<(), HostError> {
        let url = self.repo_url(&format!("/pulls/{}/merge", number));
        let body = MergeRequest {
            merge_method: method.as_str(),
            sha,
        };
        self.send(
            self.client.put(&url).json(&body),
            &format!("pull request #{}", number),
        )
        .await?;
        Ok(())
    }

    async fn latest_tag(&self, prefix: &str) -> Result<Option<String>, HostError> {
        let tags = self.list_tags().await?;
        Ok(highest_tag(tags.iter().map(|t| t.name.as_str()), prefix))
    }

    async fn tag_for_sha(&self, sha: &str) -> Result<Option<String>, HostError> {
        let tags = self.list_tags().await?;
        Ok(tags.into_iter().find(|t| t.commit.sha == sha).map(|t| t.name))
    }

    async fn create_tag(&self, tag: &str, sha: &str) -> Result<(), HostError> {
        let body = CreateRefRequest {
            git_ref: format!("refs/tags/{}", tag),
            sha: sha.to_string(),
        };
        self.send(
            self.client.post(self.repo_url("/git/refs")).json(&body),
            "git refs",
        )
        .await?;
        Ok(())
    }

    async fn issue_body(&self, number: u64) -> Result<String, HostError> {
        Ok(self.get_issue(number).await?.body.unwrap_or_default())
    }

    async fn create_issue(&self, issue: &NewIssue) -> Result<u64, HostError> {
        let body = CreateIssueRequest {
            title: &issue.title,
            body: &issue.body,
            labels: &issue.labels,
        };
        let response = self
            .send(self.client.post(self.repo_url("/issues")).json(&body), "issues")
            .await?;
        let created: Issue = response
            .json()
            .await
            .map_err(|e| GithubError::Parse(format!("created issue: {}", e)))?;
        Ok(created.number)
    }
}
