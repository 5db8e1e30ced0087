//! Autopilot controller.
//!
//! Tracks pull requests opened by finished tasks and walks each one through
//! CI, review, merge and release. Every change to a record is written to the
//! [`RecordStore`] before the in-memory cache sees it, so a restart resumes
//! from the last persisted stage. Host calls that must not be repeated
//! (tagging a release, opening a fix issue) are recorded in the store before
//! they are made.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics;
use crate::orchestrator::{PrCreated, PrCreatedListener};

use super::config::AutopilotConfig;
use super::feedback::{fix_issue, parse_iteration};
use super::host::{HostError, PrSnapshot, PrState, PullRequestHost};
use super::release::{detect_bump, next_tag};
use super::store::RecordStore;
use super::types::{AutopilotError, AutopilotRecord, CiStatus, PrStage};

/// Outcome of evaluating one record against the live PR.
enum Step {
    Unchanged,
    Update(AutopilotRecord),
    /// Stop tracking (PR closed without merge).
    Drop(&'static str),
}

/// Marks a PR number as being worked on; released on drop.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<u64>>,
    pr_number: u64,
}

impl<'a> InFlight<'a> {
    fn claim(set: &'a Mutex<HashSet<u64>>, pr_number: u64) -> Option<Self> {
        let claimed = set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(pr_number);
        claimed.then_some(Self { set, pr_number })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.pr_number);
    }
}

/// Consecutive errors advancing one PR.
struct PrErrors {
    count: u32,
    last: Instant,
}

/// Drives tracked pull requests through the merge pipeline.
pub struct AutopilotController {
    config: AutopilotConfig,
    host: Arc<dyn PullRequestHost>,
    store: Arc<dyn RecordStore>,
    records: RwLock<HashMap<u64, AutopilotRecord>>,
    in_flight: Mutex<HashSet<u64>>,
    pr_errors: Mutex<HashMap<u64, PrErrors>>,
    failures: AtomicU64,
    paused: AtomicBool,
}

impl AutopilotController {
    pub fn new(
        config: AutopilotConfig,
        host: Arc<dyn PullRequestHost>,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            config,
            host,
            store,
            records: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
            pr_errors: Mutex::new(HashMap::new()),
            failures: AtomicU64::new(0),
            paused: AtomicBool::new(false),
        }
    }

    /// Start tracking a PR. Returns `false` if it is already tracked or
    /// already finished.
    pub async fn track_pr(
        &self,
        event: PrCreated,
        initial_stage: PrStage,
    ) -> Result<bool, AutopilotError> {
        if self.is_paused() {
            warn!(pr = event.pr_number, "Autopilot paused, not tracking PR");
            return Err(AutopilotError::Paused(self.failure_count()));
        }

        let Some(_claim) = InFlight::claim(&self.in_flight, event.pr_number) else {
            debug!(pr = event.pr_number, "PR already being handled");
            return Ok(false);
        };
        if self.read_records().contains_key(&event.pr_number) {
            debug!(pr = event.pr_number, "PR already tracked");
            return Ok(false);
        }
        if let Some(stored) = self.store.get(event.pr_number)? {
            if stored.is_done(self.config.release.enabled) {
                debug!(pr = event.pr_number, stage = %stored.stage, "PR already finished");
            } else {
                debug!(pr = event.pr_number, stage = %stored.stage, "Resuming stored PR");
                self.write_records().insert(stored.pr_number, stored);
                self.update_active_gauge();
            }
            return Ok(false);
        }

        let mut record = AutopilotRecord::new(&event, initial_stage);
        if initial_stage == PrStage::CiPending {
            record.ci_wait_started_at = Some(record.created_at);
        }
        if let Err(e) = self.store.put(&record) {
            metrics::AUTOPILOT_PERSIST_ERRORS.inc();
            return Err(e.into());
        }

        info!(
            pr = record.pr_number,
            stage = %record.stage,
            task_id = %record.task_id,
            "Tracking pull request"
        );
        self.write_records().insert(record.pr_number, record);
        self.update_active_gauge();
        Ok(true)
    }

    /// Load unfinished records from the store. Returns how many were resumed.
    pub fn restore(&self) -> Result<usize, AutopilotError> {
        let release_enabled = self.config.release.enabled;
        let pending: Vec<AutopilotRecord> = self
            .store
            .list()?
            .into_iter()
            .filter(|r| !r.is_done(release_enabled))
            .collect();

        let count = pending.len();
        {
            let mut records = self.write_records();
            for record in pending {
                debug!(pr = record.pr_number, stage = %record.stage, "Resuming PR");
                records.insert(record.pr_number, record);
            }
        }
        self.update_active_gauge();
        if count > 0 {
            info!(count, "Resumed pull requests from store");
        }
        Ok(count)
    }

    /// Track open PRs on `<branch_prefix>/<item id>` branches that are not
    /// tracked yet, such as ones opened while the process was down.
    /// Returns how many were adopted.
    pub async fn scan_open_prs(&self, branch_prefix: &str) -> Result<usize, AutopilotError> {
        let prefix = format!("{}/", branch_prefix.trim_end_matches('/'));
        let mut adopted = 0;
        for pr in self.host.list_open_pull_requests().await? {
            let source_id = match pr.head_ref.strip_prefix(&prefix) {
                Some(id) if !id.is_empty() => id.to_string(),
                _ => continue,
            };
            let event = PrCreated {
                pr_number: pr.number,
                pr_url: pr.url,
                source_id,
                task_id: String::new(),
                commit_sha: Some(pr.head_sha),
                branch: pr.head_ref,
            };
            if self.track_pr(event, PrStage::Created).await? {
                adopted += 1;
            }
        }
        if adopted > 0 {
            info!(adopted, "Adopted open pull requests");
        }
        Ok(adopted)
    }

    /// Evaluate one PR and apply at most one transition.
    ///
    /// Returns the stage after the call, or `None` if the PR is no longer
    /// tracked or another advance of it is in progress.
    pub async fn advance(&self, pr_number: u64) -> Result<Option<PrStage>, AutopilotError> {
        let Some(_claim) = InFlight::claim(&self.in_flight, pr_number) else {
            return Ok(None);
        };
        let current = self
            .record(pr_number)
            .ok_or(AutopilotError::NotFound(pr_number))?;

        match self.evaluate(current.clone()).await? {
            Step::Unchanged => Ok(Some(current.stage)),
            Step::Update(next) => self.apply(current, next),
            Step::Drop(reason) => {
                info!(pr = pr_number, reason, "No longer tracking pull request");
                self.store.delete(pr_number)?;
                self.write_records().remove(&pr_number);
                self.update_active_gauge();
                Ok(None)
            }
        }
    }

    /// Advance every tracked PR concurrently.
    ///
    /// A PR whose advance keeps failing is skipped until
    /// `pr_error_reset_secs` pass, so it doesn't hold up the others.
    pub async fn advance_all(&self) {
        let numbers: Vec<u64> = self
            .read_records()
            .keys()
            .copied()
            .filter(|n| !self.is_pr_blocked(*n))
            .collect();
        let results = join_all(numbers.iter().map(|n| self.advance(*n))).await;
        for (n, result) in numbers.iter().zip(results) {
            match result {
                Ok(_) => {
                    self.pr_errors().remove(n);
                }
                Err(e) => {
                    warn!(pr = n, error = %e, "Failed to advance pull request");
                    self.record_pr_error(*n);
                }
            }
        }
    }

    /// Tick until cancelled. The tick is faster while any PR waits on CI.
    pub async fn run(&self, cancel: CancellationToken) {
        info!("Autopilot controller started");
        loop {
            self.advance_all().await;

            let interval = self.current_interval();
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        info!("Autopilot controller stopped");
    }

    pub fn current_interval(&self) -> Duration {
        let waiting_on_ci = self
            .read_records()
            .values()
            .any(|r| r.stage.is_waiting_on_ci());
        if waiting_on_ci {
            Duration::from_millis(self.config.fast_poll_interval_ms)
        } else {
            Duration::from_millis(self.config.poll_interval_ms)
        }
    }

    /// Tracked records ordered by PR number.
    pub fn active_records(&self) -> Vec<AutopilotRecord> {
        let mut records: Vec<AutopilotRecord> = self.read_records().values().cloned().collect();
        records.sort_by_key(|r| r.pr_number);
        records
    }

    pub fn record(&self, pr_number: u64) -> Option<AutopilotRecord> {
        self.read_records().get(&pr_number).cloned()
    }

    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// PRs currently skipped after repeated errors, ascending.
    pub fn blocked_prs(&self) -> Vec<u64> {
        let mut blocked: Vec<u64> = self
            .read_records()
            .keys()
            .copied()
            .filter(|n| self.is_pr_blocked(*n))
            .collect();
        blocked.sort_unstable();
        blocked
    }

    /// Clear the failure count and accept new PRs again. Blocked PRs are
    /// unblocked too.
    pub fn reset_circuit_breaker(&self) {
        self.failures.store(0, Ordering::SeqCst);
        self.pr_errors().clear();
        if self.paused.swap(false, Ordering::SeqCst) {
            info!("Autopilot circuit breaker reset");
        }
    }

    fn is_pr_blocked(&self, pr_number: u64) -> bool {
        let max = self.config.pr_max_errors;
        if max == 0 {
            return false;
        }
        let reset_after = Duration::from_secs(self.config.pr_error_reset_secs);
        let mut errors = self.pr_errors();
        match errors.get(&pr_number) {
            Some(e) if e.last.elapsed() >= reset_after => {
                debug!(pr = pr_number, "Error count expired, retrying PR");
                errors.remove(&pr_number);
                false
            }
            Some(e) => e.count >= max,
            None => false,
        }
    }

    fn record_pr_error(&self, pr_number: u64) {
        let mut errors = self.pr_errors();
        let entry = errors.entry(pr_number).or_insert(PrErrors {
            count: 0,
            last: Instant::now(),
        });
        entry.count += 1;
        entry.last = Instant::now();
        if entry.count == self.config.pr_max_errors {
            warn!(
                pr = pr_number,
                errors = entry.count,
                retry_secs = self.config.pr_error_reset_secs,
                "Pausing pull request after repeated errors"
            );
        }
    }

    fn apply(
        &self,
        previous: AutopilotRecord,
        mut next: AutopilotRecord,
    ) -> Result<Option<PrStage>, AutopilotError> {
        let mut unchanged = next.clone();
        unchanged.last_checked = previous.last_checked;
        if unchanged == previous {
            if let Some(cached) = self.write_records().get_mut(&previous.pr_number) {
                cached.last_checked = next.last_checked;
            }
            return Ok(Some(previous.stage));
        }

        next.updated_at = Utc::now();
        if let Err(e) = self.store.put(&next) {
            metrics::AUTOPILOT_PERSIST_ERRORS.inc();
            warn!(
                pr = next.pr_number,
                stage = %next.stage,
                error = %e,
                "Failed to persist record, transition not applied"
            );
            return Err(e.into());
        }

        if previous.stage != next.stage {
            metrics::AUTOPILOT_TRANSITIONS
                .with_label_values(&[previous.stage.as_str(), next.stage.as_str()])
                .inc();
            info!(
                pr = next.pr_number,
                from = %previous.stage,
                to = %next.stage,
                "Pull request stage changed"
            );
            if next.stage.is_failure() {
                self.record_failure(&next);
            }
        }

        let stage = next.stage;
        if next.is_done(self.config.release.enabled) {
            self.write_records().remove(&next.pr_number);
        } else {
            self.write_records().insert(next.pr_number, next);
        }
        self.update_active_gauge();
        Ok(Some(stage))
    }

    /// Persist `record` mid-evaluation, ahead of a host call that must not
    /// be repeated.
    fn write_ahead(&self, record: &AutopilotRecord) -> Result<(), AutopilotError> {
        let mut record = record.clone();
        record.updated_at = Utc::now();
        if let Err(e) = self.store.put(&record) {
            metrics::AUTOPILOT_PERSIST_ERRORS.inc();
            warn!(pr = record.pr_number, error = %e, "Failed to persist record ahead of host call");
            return Err(e.into());
        }
        self.write_records().insert(record.pr_number, record);
        Ok(())
    }

    fn record_failure(&self, record: &AutopilotRecord) {
        metrics::AUTOPILOT_FAILURES.inc();
        let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
        warn!(
            pr = record.pr_number,
            stage = %record.stage,
            error = record.last_error.as_deref().unwrap_or("-"),
            failures,
            "Pull request failed"
        );
        if self.config.max_failures > 0
            && failures >= self.config.max_failures
            && !self.paused.swap(true, Ordering::SeqCst)
        {
            warn!(failures, "Autopilot paused, too many failed pull requests");
        }
    }

    /// Host errors are folded into the record; store errors abort the step.
    async fn evaluate(&self, mut record: AutopilotRecord) -> Result<Step, AutopilotError> {
        if record.is_done(self.config.release.enabled) {
            return Ok(Step::Unchanged);
        }
        record.last_checked = Some(Utc::now());

        let pr = match self.host.pull_request(record.pr_number).await {
            Ok(pr) => pr,
            Err(e) => return Ok(self.api_failure(record, e)),
        };

        if pr.merged && record.stage.is_pre_merge() {
            info!(pr = record.pr_number, "Pull request merged");
            record.stage = PrStage::Merged;
            record.consecutive_api_failures = 0;
            return Ok(Step::Update(record));
        }
        if pr.state == PrState::Closed && !pr.merged {
            if record.stage == PrStage::Merging {
                record.fail(PrStage::MergeFailed, "pull request closed before merge");
                return Ok(Step::Update(record));
            }
            return Ok(Step::Drop("closed without merge"));
        }

        let result = match record.stage {
            PrStage::Created => {
                self.on_created(&mut record, &pr);
                Ok(())
            }
            PrStage::CiPending => self.on_ci_pending(&mut record, &pr).await,
            PrStage::CiPassed => {
                self.on_ci_passed(&mut record);
                Ok(())
            }
            PrStage::Reviewing => self.on_reviewing(&mut record).await,
            PrStage::Merging => {
                self.on_merging(&mut record, &pr).await;
                Ok(())
            }
            PrStage::Merged => self.on_merged(&mut record, &pr).await,
            _ => Ok(()),
        };

        match result {
            Ok(()) => {
                record.consecutive_api_failures = 0;
                Ok(Step::Update(record))
            }
            Err(AutopilotError::Host(e)) => Ok(self.api_failure(record, e)),
            Err(e) => Err(e),
        }
    }

    fn on_created(&self, record: &mut AutopilotRecord, pr: &PrSnapshot) {
        if pr.mergeable == Some(false) {
            record.fail(PrStage::MergeFailed, "merge conflict");
            return;
        }
        record.stage = PrStage::CiPending;
        record.head_sha = Some(pr.head_sha.clone());
        record.ci_wait_started_at = Some(Utc::now());
    }

    async fn on_ci_pending(
        &self,
        record: &mut AutopilotRecord,
        pr: &PrSnapshot,
    ) -> Result<(), AutopilotError> {
        record.head_sha = Some(pr.head_sha.clone());

        let now = Utc::now();
        let started = *record.ci_wait_started_at.get_or_insert(now);
        let waited = (now - started).num_seconds().max(0) as u64;
        if waited >= self.config.ci_timeout_secs {
            record.fail(
                PrStage::CiFailed,
                format!("CI timed out after {}s", self.config.ci_timeout_secs),
            );
            return Ok(());
        }

        let status = self.host.ci_status(&pr.head_sha).await?;
        record.ci_status = status;
        match status {
            CiStatus::Success => record.stage = PrStage::CiPassed,
            CiStatus::Failure if self.config.feedback.enabled => {
                self.request_fix(record, pr).await?
            }
            CiStatus::Failure => record.fail(PrStage::CiFailed, "CI failed"),
            CiStatus::Pending | CiStatus::Running => {}
        }
        Ok(())
    }

    /// Replace a PR whose CI failed with a fix issue, then close it.
    async fn request_fix(
        &self,
        record: &mut AutopilotRecord,
        pr: &PrSnapshot,
    ) -> Result<(), AutopilotError> {
        let feedback = &self.config.feedback;

        let issue_number = match record.fix_issue {
            Some(number) => number,
            None if record.fix_requested => {
                warn!(
                    pr = record.pr_number,
                    "Earlier fix issue request was interrupted, not opening another"
                );
                record.fail(PrStage::CiFailed, "CI failed; fix issue request was interrupted");
                return Ok(());
            }
            None => {
                let iteration = self.fix_iteration(record).await;
                let max = feedback.max_ci_fix_iterations;
                if max > 0 && iteration >= max {
                    warn!(pr = record.pr_number, iteration, max, "CI fix limit reached");
                    if let Err(e) = self.host.close_pull_request(record.pr_number).await {
                        warn!(pr = record.pr_number, error = %e, "Failed to close pull request");
                    }
                    record.fail(
                        PrStage::CiFailed,
                        format!("CI fix iteration limit reached ({}/{})", iteration, max),
                    );
                    return Ok(());
                }

                let failed_checks = match self.host.failed_checks(&pr.head_sha).await {
                    Ok(checks) => checks,
                    Err(e) => {
                        warn!(pr = record.pr_number, error = %e, "Failed to list failed checks");
                        Vec::new()
                    }
                };
                let issue = fix_issue(record, &failed_checks, iteration + 1, &feedback.issue_labels);

                record.fix_requested = true;
                self.write_ahead(record)?;
                match self.host.create_issue(&issue).await {
                    Ok(number) => {
                        info!(pr = record.pr_number, issue = number, iteration = iteration + 1, "Opened fix issue");
                        metrics::AUTOPILOT_FIX_ISSUES.inc();
                        record.fix_issue = Some(number);
                        number
                    }
                    Err(e) => {
                        // A rejected request created nothing and may be retried.
                        if e.is_rejection() {
                            record.fix_requested = false;
                        }
                        return Err(e.into());
                    }
                }
            }
        };

        self.host.close_pull_request(record.pr_number).await?;
        record.fail(
            PrStage::CiFailed,
            format!("CI failed, replaced by fix issue #{}", issue_number),
        );
        Ok(())
    }

    /// Depth of the fix chain this PR belongs to, read from its work item.
    async fn fix_iteration(&self, record: &AutopilotRecord) -> u32 {
        let Ok(issue) = record.source_id.parse::<u64>() else {
            return 0;
        };
        match self.host.issue_body(issue).await {
            Ok(body) => parse_iteration(&body),
            Err(e) => {
                warn!(pr = record.pr_number, issue, error = %e, "Failed to read issue, assuming first fix");
                0
            }
        }
    }

    fn on_ci_passed(&self, record: &mut AutopilotRecord) {
        if self.config.auto_review {
            record.stage = PrStage::Reviewing;
        } else if self.config.auto_merge {
            record.stage = PrStage::Merging;
        }
    }

    async fn on_reviewing(&self, record: &mut AutopilotRecord) -> Result<(), AutopilotError> {
        if !record.review_submitted {
            // The approval may have gone through before a failed persist.
            if self.host.has_approval(record.pr_number).await? {
                debug!(pr = record.pr_number, "Pull request already approved");
            } else {
                self.host.approve(record.pr_number).await?;
            }
            record.review_submitted = true;
        }
        if self.config.auto_merge {
            record.stage = PrStage::Merging;
        }
        Ok(())
    }

    async fn on_merging(&self, record: &mut AutopilotRecord, pr: &PrSnapshot) {
        if pr.mergeable == Some(false) {
            record.fail(PrStage::MergeFailed, "merge conflict");
            return;
        }

        record.merge_attempts += 1;
        match self
            .host
            .merge(record.pr_number, self.config.merge_method, &pr.head_sha)
            .await
        {
            Ok(()) => {
                record.stage = PrStage::Merged;
                record.last_error = None;
            }
            Err(e) if record.merge_attempts >= self.config.max_merge_attempts => {
                record.fail(
                    PrStage::MergeFailed,
                    format!(
                        "merge failed after {} attempts: {}",
                        record.merge_attempts, e
                    ),
                );
            }
            Err(e) => {
                debug!(pr = record.pr_number, attempt = record.merge_attempts, error = %e, "Merge attempt failed");
                record.last_error = Some(e.to_string());
            }
        }
    }

    async fn on_merged(
        &self,
        record: &mut AutopilotRecord,
        pr: &PrSnapshot,
    ) -> Result<(), AutopilotError> {
        let sha = pr.merge_commit_sha.as_deref().unwrap_or(&pr.head_sha);

        if let Some(existing) = self.host.tag_for_sha(sha).await? {
            info!(pr = record.pr_number, tag = %existing, "Merge commit already tagged");
            record.release_tag = Some(existing);
            record.stage = PrStage::Released;
            return Ok(());
        }

        let tag = match record.release_tag.clone() {
            Some(tag) => tag,
            None => {
                let prefix = &self.config.release.tag_prefix;
                let mut messages = self.host.commit_messages(record.pr_number).await?;
                messages.push(pr.title.clone());
                let bump = detect_bump(messages.iter().map(String::as_str));
                let latest = self.host.latest_tag(prefix).await?;
                let Some(tag) = next_tag(latest.as_deref(), prefix, bump) else {
                    info!(pr = record.pr_number, "No releasable changes, not tagging");
                    record.stage = PrStage::Released;
                    return Ok(());
                };
                record.release_tag = Some(tag.clone());
                self.write_ahead(record)?;
                tag
            }
        };

        self.host.create_tag(&tag, sha).await?;
        info!(pr = record.pr_number, tag = %tag, "Release tagged");
        record.stage = PrStage::Released;
        Ok(())
    }

    fn api_failure(&self, mut record: AutopilotRecord, error: HostError) -> Step {
        if let HostError::RateLimited { reset_at } = error {
            debug!(pr = record.pr_number, %reset_at, "Rate limited, retrying later");
            return Step::Unchanged;
        }

        record.consecutive_api_failures += 1;
        record.last_error = Some(error.to_string());
        warn!(
            pr = record.pr_number,
            stage = %record.stage,
            failures = record.consecutive_api_failures,
            error = %error,
            "Host API call failed"
        );

        if record.consecutive_api_failures >= self.config.max_api_failures {
            let failed = match record.stage {
                PrStage::Created | PrStage::CiPending => PrStage::CiFailed,
                PrStage::Merged => PrStage::ReleaseFailed,
                _ => PrStage::MergeFailed,
            };
            let message = format!(
                "{} consecutive API failures: {}",
                record.consecutive_api_failures, error
            );
            record.fail(failed, message);
        }
        Step::Update(record)
    }

    fn update_active_gauge(&self) {
        metrics::AUTOPILOT_ACTIVE.set(self.read_records().len() as i64);
    }

    fn pr_errors(&self) -> MutexGuard<'_, HashMap<u64, PrErrors>> {
        self.pr_errors.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_records(&self) -> std::sync::RwLockReadGuard<'_, HashMap<u64, AutopilotRecord>> {
        self.records.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_records(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<u64, AutopilotRecord>> {
        self.records.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl PrCreatedListener for AutopilotController {
    async fn on_pr_created(&self, event: PrCreated) {
        let pr_number = event.pr_number;
        if let Err(e) = self.track_pr(event, PrStage::Created).await {
            warn!(pr = pr_number, error = %e, "Could not track pull request");
        }
    }
}
