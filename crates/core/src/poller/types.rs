//! Types for the ingestion poller.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::source::WorkItem;

/// Per-item callback invoked by the poller.
///
/// An error is logged and the item stays processed; the poller never
/// retries it on its own.
#[async_trait]
pub trait ItemHandler: Send + Sync {
    async fn handle(&self, item: WorkItem, cancel: CancellationToken) -> anyhow::Result<()>;
}

/// Tracker labels that describe an item's processing status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusLabels {
    /// Item is being worked on elsewhere; skip it this tick.
    pub in_progress: String,
    /// Item is finished; mark processed without dispatch.
    pub done: String,
    /// Item failed; skip until the label is removed.
    pub failed: String,
}

/// Snapshot of poller activity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PollerStatus {
    pub running: bool,
    pub source: String,
    pub max_concurrent: usize,
    /// Handlers currently holding a slot.
    pub in_flight: usize,
    pub processed_count: usize,
    pub ticks: u64,
    pub dispatched: u64,
    pub handler_failures: u64,
    /// Listing is suspended until this time after a rate-limit response.
    pub rate_limited_until: Option<DateTime<Utc>>,
}
