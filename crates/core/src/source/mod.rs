//! External work-item sources (issue trackers).
//!
//! A [`WorkSource`] is polled by the [`Poller`](crate::poller::Poller) for
//! open items. Items are immutable snapshots; they are re-fetched every
//! cycle and never cached by the core.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A ticket or issue fetched from an external tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Tracker-assigned identifier (for GitHub, the issue number).
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub labels: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl WorkItem {
    /// Case-insensitive label check.
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l.eq_ignore_ascii_case(label))
    }
}

/// Errors returned by work-item sources.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// The source asked us to back off until `reset_at`.
    #[error("rate limited until {reset_at}")]
    RateLimited { reset_at: DateTime<Utc> },

    /// Network failure or timeout.
    #[error("request failed: {0}")]
    Request(String),

    /// Non-success response from the source API.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Response body could not be decoded.
    #[error("failed to parse response: {0}")]
    Parse(String),
}

/// Lists candidate work items.
#[async_trait]
pub trait WorkSource: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Fetch every open item eligible for processing.
    async fn list_open_items(&self) -> Result<Vec<WorkItem>, SourceError>;
}

/// Writes status labels back to the tracker.
///
/// Removing a label the item doesn't carry is not an error.
#[async_trait]
pub trait ItemLabeler: Send + Sync {
    async fn add_label(&self, item_id: &str, label: &str) -> Result<(), SourceError>;

    async fn remove_label(&self, item_id: &str, label: &str) -> Result<(), SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_label_ignores_case() {
        let item = WorkItem {
            id: "7".to_string(),
            title: "Add retries".to_string(),
            body: String::new(),
            labels: vec!["Shipyard".to_string(), "bug".to_string()],
            created_at: Utc::now(),
        };
        assert!(item.has_label("shipyard"));
        assert!(item.has_label("BUG"));
        assert!(!item.has_label("feature"));
    }

    #[test]
    fn test_error_display() {
        let err = SourceError::Api {
            status: 502,
            message: "bad gateway".to_string(),
        };
        assert_eq!(err.to_string(), "API error (502): bad gateway");
    }

    #[test]
    fn test_work_item_deserialize_defaults() {
        let item: WorkItem = serde_json::from_str(
            r#"{"id":"1","title":"t","created_at":"2026-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert!(item.body.is_empty());
        assert!(item.labels.is_empty());
    }
}
