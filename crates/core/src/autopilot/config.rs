//! Autopilot configuration.

use serde::{Deserialize, Serialize};

/// How autopilot merges a pull request.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MergeMethod {
    Merge,
    #[default]
    Squash,
    Rebase,
}

impl MergeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeMethod::Merge => "merge",
            MergeMethod::Squash => "squash",
            MergeMethod::Rebase => "rebase",
        }
    }
}

/// Pull-request autopilot configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AutopilotConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Merge automatically once CI (and review, if enabled) passes.
    #[serde(default)]
    pub auto_merge: bool,
    /// Submit an approving review once CI passes.
    #[serde(default)]
    pub auto_review: bool,
    #[serde(default)]
    pub merge_method: MergeMethod,
    /// Controller tick when nothing is waiting on CI (milliseconds).
    #[serde(default = "default_autopilot_interval")]
    pub poll_interval_ms: u64,
    /// Controller tick while any PR is waiting on CI (milliseconds).
    #[serde(default = "default_autopilot_fast_interval")]
    pub fast_poll_interval_ms: u64,
    /// Give up on CI after this long.
    #[serde(default = "default_ci_timeout")]
    pub ci_timeout_secs: u64,
    /// Consecutive CI API errors tolerated before failing the PR.
    #[serde(default = "default_max_api_failures")]
    pub max_api_failures: u32,
    /// Merge calls attempted before giving up.
    #[serde(default = "default_max_merge_attempts")]
    pub max_merge_attempts: u32,
    /// Failed PRs tolerated before autopilot stops accepting new ones.
    #[serde(default = "default_max_failures")]
    pub max_failures: u64,
    /// Consecutive errors advancing one PR before it is skipped for a while.
    #[serde(default = "default_pr_max_errors")]
    pub pr_max_errors: u32,
    /// How long a PR with too many errors is skipped (seconds).
    #[serde(default = "default_pr_error_reset")]
    pub pr_error_reset_secs: u64,
    #[serde(default)]
    pub feedback: FeedbackConfig,
    #[serde(default)]
    pub release: ReleaseConfig,
}

impl Default for AutopilotConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            auto_merge: false,
            auto_review: false,
            merge_method: MergeMethod::default(),
            poll_interval_ms: default_autopilot_interval(),
            fast_poll_interval_ms: default_autopilot_fast_interval(),
            ci_timeout_secs: default_ci_timeout(),
            max_api_failures: default_max_api_failures(),
            max_merge_attempts: default_max_merge_attempts(),
            max_failures: default_max_failures(),
            pr_max_errors: default_pr_max_errors(),
            pr_error_reset_secs: default_pr_error_reset(),
            feedback: FeedbackConfig::default(),
            release: ReleaseConfig::default(),
        }
    }
}

fn default_autopilot_interval() -> u64 {
    30_000
}

fn default_autopilot_fast_interval() -> u64 {
    5_000
}

fn default_ci_timeout() -> u64 {
    30 * 60
}

fn default_max_api_failures() -> u32 {
    5
}

fn default_max_merge_attempts() -> u32 {
    3
}

fn default_max_failures() -> u64 {
    3
}

fn default_pr_max_errors() -> u32 {
    3
}

fn default_pr_error_reset() -> u64 {
    30 * 60
}

/// Replace a PR whose CI failed with a fix issue.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeedbackConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Labels on fix issues. Include the poller label so they get picked up.
    #[serde(default = "default_issue_labels")]
    pub issue_labels: Vec<String>,
    /// Depth of a fix-issue chain at which no further issue is opened.
    /// Zero means no limit.
    #[serde(default = "default_max_ci_fix_iterations")]
    pub max_ci_fix_iterations: u32,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            issue_labels: default_issue_labels(),
            max_ci_fix_iterations: default_max_ci_fix_iterations(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_issue_labels() -> Vec<String> {
    vec!["shipyard".to_string(), "autopilot-fix".to_string()]
}

fn default_max_ci_fix_iterations() -> u32 {
    3
}

/// Tag a release after a merge.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReleaseConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_tag_prefix")]
    pub tag_prefix: String,
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            tag_prefix: default_tag_prefix(),
        }
    }
}

fn default_tag_prefix() -> String {
    "v".to_string()
}
