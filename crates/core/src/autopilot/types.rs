//! Types for the pull-request autopilot.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::orchestrator::PrCreated;

use super::host::HostError;
use super::store::StoreError;

/// Errors returned by the autopilot controller.
#[derive(Debug, Error)]
pub enum AutopilotError {
    /// Too many PRs failed; new PRs are refused until the breaker is reset.
    #[error("autopilot is paused after {0} failures")]
    Paused(u64),

    #[error("no active record for PR #{0}")]
    NotFound(u64),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Host(#[from] HostError),
}

/// Pipeline stage of a tracked pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrStage {
    Created,
    CiPending,
    CiPassed,
    Reviewing,
    Merging,
    Merged,
    Released,
    CiFailed,
    MergeFailed,
    ReleaseFailed,
}

impl PrStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrStage::Created => "created",
            PrStage::CiPending => "ci_pending",
            PrStage::CiPassed => "ci_passed",
            PrStage::Reviewing => "reviewing",
            PrStage::Merging => "merging",
            PrStage::Merged => "merged",
            PrStage::Released => "released",
            PrStage::CiFailed => "ci_failed",
            PrStage::MergeFailed => "merge_failed",
            PrStage::ReleaseFailed => "release_failed",
        }
    }

    /// `released` and every `*_failed` stage.
    pub fn is_terminal(&self) -> bool {
        self.is_failure() || matches!(self, PrStage::Released)
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            PrStage::CiFailed | PrStage::MergeFailed | PrStage::ReleaseFailed
        )
    }

    /// Stages before the PR is merged.
    pub fn is_pre_merge(&self) -> bool {
        matches!(
            self,
            PrStage::Created
                | PrStage::CiPending
                | PrStage::CiPassed
                | PrStage::Reviewing
                | PrStage::Merging
        )
    }

    /// Stages that poll CI and warrant the fast tick.
    pub fn is_waiting_on_ci(&self) -> bool {
        matches!(self, PrStage::Created | PrStage::CiPending)
    }
}

impl fmt::Display for PrStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "created" => PrStage::Created,
            "ci_pending" => PrStage::CiPending,
            "ci_passed" => PrStage::CiPassed,
            "reviewing" => PrStage::Reviewing,
            "merging" => PrStage::Merging,
            "merged" => PrStage::Merged,
            "released" => PrStage::Released,
            "ci_failed" => PrStage::CiFailed,
            "merge_failed" => PrStage::MergeFailed,
            "release_failed" => PrStage::ReleaseFailed,
            other => return Err(format!("unknown PR stage: {}", other)),
        })
    }
}

/// Combined CI status of a commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CiStatus {
    #[default]
    Pending,
    Running,
    Success,
    Failure,
}

impl CiStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CiStatus::Pending => "pending",
            CiStatus::Running => "running",
            CiStatus::Success => "success",
            CiStatus::Failure => "failure",
        }
    }
}

impl FromStr for CiStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending" => CiStatus::Pending,
            "running" => CiStatus::Running,
            "success" => CiStatus::Success,
            "failure" => CiStatus::Failure,
            other => return Err(format!("unknown CI status: {}", other)),
        })
    }
}

/// Durable state for one tracked pull request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutopilotRecord {
    pub pr_number: u64,
    pub pr_url: String,
    pub stage: PrStage,
    pub ci_status: CiStatus,
    pub last_error: Option<String>,
    pub branch: String,
    /// Head commit; refreshed while waiting on CI.
    pub head_sha: Option<String>,
    /// Work item the PR was built for.
    pub source_id: String,
    pub task_id: String,
    pub merge_attempts: u32,
    pub consecutive_api_failures: u32,
    pub review_submitted: bool,
    pub ci_wait_started_at: Option<DateTime<Utc>>,
    pub last_checked: Option<DateTime<Utc>>,
    /// Set before the tag is created, so a retry reuses the same name.
    pub release_tag: Option<String>,
    /// Set before a fix issue is requested; a fix issue is opened at most once.
    pub fix_requested: bool,
    pub fix_issue: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AutopilotRecord {
    pub fn new(event: &PrCreated, stage: PrStage) -> Self {
        let now = Utc::now();
        Self {
            pr_number: event.pr_number,
            pr_url: event.pr_url.clone(),
            stage,
            ci_status: CiStatus::Pending,
            last_error: None,
            branch: event.branch.clone(),
            head_sha: event.commit_sha.clone(),
            source_id: event.source_id.clone(),
            task_id: event.task_id.clone(),
            merge_attempts: 0,
            consecutive_api_failures: 0,
            review_submitted: false,
            ci_wait_started_at: None,
            last_checked: None,
            release_tag: None,
            fix_requested: false,
            fix_issue: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Nothing left to do: terminal, or merged with releases disabled.
    pub fn is_done(&self, release_enabled: bool) -> bool {
        self.stage.is_terminal() || (self.stage == PrStage::Merged && !release_enabled)
    }

    pub(crate) fn fail(&mut self, stage: PrStage, error: impl Into<String>) {
        self.stage = stage;
        self.last_error = Some(error.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;

    #[test]
    fn test_stage_round_trips_through_str() {
        for stage in [
            PrStage::Created,
            PrStage::CiPending,
            PrStage::CiPassed,
            PrStage::Reviewing,
            PrStage::Merging,
            PrStage::Merged,
            PrStage::Released,
            PrStage::CiFailed,
            PrStage::MergeFailed,
            PrStage::ReleaseFailed,
        ] {
            assert_eq!(stage.as_str().parse::<PrStage>().unwrap(), stage);
        }
        assert!("bogus".parse::<PrStage>().is_err());
    }

    #[test]
    fn test_terminal_stages() {
        assert!(PrStage::Released.is_terminal());
        assert!(PrStage::CiFailed.is_terminal());
        assert!(PrStage::MergeFailed.is_terminal());
        assert!(!PrStage::Merged.is_terminal());
        assert!(!PrStage::Merging.is_terminal());
        assert!(!PrStage::Released.is_failure());
    }

    #[test]
    fn test_record_is_done() {
        let mut record = AutopilotRecord::new(&fixtures::pr_created(3), PrStage::Created);
        assert!(!record.is_done(false));

        record.stage = PrStage::Merged;
        assert!(record.is_done(false));
        assert!(!record.is_done(true));

        record.stage = PrStage::Released;
        assert!(record.is_done(true));
    }

    #[test]
    fn test_stage_serializes_snake_case() {
        let json = serde_json::to_string(&PrStage::CiPending).unwrap();
        assert_eq!(json, "\"ci_pending\"");
    }
}
