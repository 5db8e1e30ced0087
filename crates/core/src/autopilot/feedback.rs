//! Fix issues for pull requests whose CI failed.
//!
//! A failed PR is closed and replaced by an issue describing the failure.
//! The issue carries the poller label, so it is picked up like any other
//! work item. Each fix issue records how deep in a chain of fixes it is;
//! the chain stops at a configured depth.

use std::fmt::Write;

use once_cell::sync::Lazy;
use regex_lite::Regex;

use super::types::AutopilotRecord;

static ITERATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<!-- autopilot-meta.*?iteration:(\d+).*?-->").unwrap());

/// Issue to open on the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIssue {
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
}

/// Fix-chain depth recorded in an issue body; `0` for a hand-written issue.
pub fn parse_iteration(body: &str) -> u32 {
    ITERATION_RE
        .captures(body)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// Issue asking for the CI failures of `record` to be fixed.
pub fn fix_issue(
    record: &AutopilotRecord,
    failed_checks: &[String],
    iteration: u32,
    labels: &[String],
) -> NewIssue {
    let mut body = String::from("# Autopilot: fix request\n\n## Context\n\n");
    let _ = writeln!(body, "- **Pull request**: #{}", record.pr_number);
    if record.source_id.parse::<u64>().is_ok() {
        let _ = writeln!(body, "- **Original issue**: #{}", record.source_id);
    }
    if let Some(sha) = record.head_sha.as_deref() {
        let _ = writeln!(body, "- **Commit**: {}", sha.get(..7).unwrap_or(sha));
    }
    if !record.branch.is_empty() {
        let _ = writeln!(body, "- **Branch**: {}", record.branch);
    }
    body.push('\n');

    if !failed_checks.is_empty() {
        body.push_str("## Failed checks\n\n");
        for check in failed_checks {
            let _ = writeln!(body, "- [ ] {}", check);
        }
        body.push('\n');
    }

    body.push_str("## Task\n\nFix the CI failures listed above. Run the tests locally before committing.\n");
    let _ = write!(
        body,
        "\n<!-- autopilot-meta branch:{} pr:{} iteration:{} -->\n",
        record.branch, record.pr_number, iteration
    );

    NewIssue {
        title: format!("Fix CI failure from PR #{}", record.pr_number),
        body,
        labels: labels.to_vec(),
    }
}
