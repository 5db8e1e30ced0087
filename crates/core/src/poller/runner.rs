//! Poller implementation.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics::{POLLER_DISPATCHED, POLLER_HANDLER_FAILURES, POLLER_LISTINGS};
use crate::source::{SourceError, WorkItem, WorkSource};

use super::config::PollerConfig;
use super::dependencies::parse_dependencies;
use super::types::{ItemHandler, PollerStatus, StatusLabels};

/// Periodically lists work items and dispatches unseen ones.
pub struct Poller {
    source: Arc<dyn WorkSource>,
    handler: Arc<dyn ItemHandler>,
    interval: Duration,
    max_concurrent: usize,
    slots: Arc<Semaphore>,
    processed: Mutex<HashSet<String>>,
    labels: Option<StatusLabels>,
    rate_limited_until: Mutex<Option<DateTime<Utc>>>,

    // Runtime state
    running: AtomicBool,
    ticks: AtomicU64,
    dispatched: Arc<AtomicU64>,
    handler_failures: Arc<AtomicU64>,
}

impl Poller {
    /// Create a poller with a single concurrency slot.
    pub fn new(
        source: Arc<dyn WorkSource>,
        handler: Arc<dyn ItemHandler>,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            handler,
            interval,
            max_concurrent: 1,
            slots: Arc::new(Semaphore::new(1)),
            processed: Mutex::new(HashSet::new()),
            labels: None,
            rate_limited_until: Mutex::new(None),
            running: AtomicBool::new(false),
            ticks: AtomicU64::new(0),
            dispatched: Arc::new(AtomicU64::new(0)),
            handler_failures: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Create a poller from configuration.
    pub fn from_config(
        config: &PollerConfig,
        source: Arc<dyn WorkSource>,
        handler: Arc<dyn ItemHandler>,
    ) -> Self {
        Self::new(source, handler, Duration::from_millis(config.interval_ms))
            .with_max_concurrent(config.max_concurrent)
    }

    /// Set the number of concurrency slots (minimum 1).
    pub fn with_max_concurrent(mut self, n: usize) -> Self {
        let n = n.max(1);
        self.max_concurrent = n;
        self.slots = Arc::new(Semaphore::new(n));
        self
    }

    /// Honour tracker status labels when selecting items.
    pub fn with_status_labels(mut self, labels: StatusLabels) -> Self {
        self.labels = Some(labels);
        self
    }

    /// Poll until `cancel` fires. The first tick runs immediately.
    pub async fn start(&self, cancel: CancellationToken) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Poller already running");
            return;
        }
        info!(
            source = self.source.name(),
            interval_ms = self.interval.as_millis() as u64,
            max_concurrent = self.max_concurrent,
            "Poller started"
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }
            self.poll_once(&cancel).await;

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Poller received shutdown signal");
                    break;
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("Poller stopped");
    }

    /// Run a single tick. Returns the number of items dispatched.
    pub async fn poll_once(&self, cancel: &CancellationToken) -> usize {
        self.ticks.fetch_add(1, Ordering::Relaxed);

        if let Some(until) = self.rate_limit_deadline() {
            debug!(until = %until, "Listing suspended by rate limit");
            return 0;
        }

        let mut items = match self.source.list_open_items().await {
            Ok(items) => {
                POLLER_LISTINGS.with_label_values(&["ok"]).inc();
                items
            }
            Err(SourceError::RateLimited { reset_at }) => {
                POLLER_LISTINGS.with_label_values(&["rate_limited"]).inc();
                warn!(source = self.source.name(), reset_at = %reset_at, "Source rate limited, backing off");
                *lock(&self.rate_limited_until) = Some(reset_at);
                return 0;
            }
            Err(e) => {
                POLLER_LISTINGS.with_label_values(&["error"]).inc();
                warn!(source = self.source.name(), error = %e, "Failed to list work items");
                return 0;
            }
        };

        items.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        let open_ids: HashSet<String> = items.iter().map(|i| i.id.clone()).collect();

        let mut dispatched = 0;
        for item in items {
            if cancel.is_cancelled() {
                break;
            }
            if self.is_processed(&item.id) || !self.is_eligible(&item, &open_ids) {
                continue;
            }

            // Claim the item before waiting for a slot; a concurrent tick
            // that lists it again sees it as processed.
            if !self.mark_processed(&item.id) {
                continue;
            }

            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = Arc::clone(&self.slots).acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                self.unmark(&item.id);
                break;
            };

            self.spawn_handler(item, permit, cancel.clone());
            dispatched += 1;
        }

        dispatched
    }

    /// Wait until every in-flight handler has returned.
    ///
    /// Dispatch is not affected; stop it by cancelling the token given to
    /// [`start`](Self::start).
    pub async fn wait_for_active(&self) {
        let all = u32::try_from(self.max_concurrent).unwrap_or(u32::MAX);
        if let Ok(permits) = self.slots.acquire_many(all).await {
            drop(permits);
        }
        debug!("All poller handlers finished");
    }

    pub fn processed_count(&self) -> usize {
        lock(&self.processed).len()
    }

    pub fn is_processed(&self, id: &str) -> bool {
        lock(&self.processed).contains(id)
    }

    /// Forget every processed item.
    pub fn reset(&self) {
        let mut processed = lock(&self.processed);
        info!(count = processed.len(), "Resetting processed items");
        processed.clear();
    }

    /// Forget one processed item so it can be dispatched again.
    pub fn clear_processed(&self, id: &str) -> bool {
        lock(&self.processed).remove(id)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn status(&self) -> PollerStatus {
        PollerStatus {
            running: self.running.load(Ordering::Relaxed),
            source: self.source.name().to_string(),
            max_concurrent: self.max_concurrent,
            in_flight: self
                .max_concurrent
                .saturating_sub(self.slots.available_permits()),
            processed_count: self.processed_count(),
            ticks: self.ticks.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            rate_limited_until: *lock(&self.rate_limited_until),
        }
    }

    fn is_eligible(&self, item: &WorkItem, open_ids: &HashSet<String>) -> bool {
        if let Some(labels) = &self.labels {
            if item.has_label(&labels.in_progress) || item.has_label(&labels.failed) {
                debug!(item_id = %item.id, "Skipping item with status label");
                return false;
            }
            if item.has_label(&labels.done) {
                self.mark_processed(&item.id);
                return false;
            }
        }

        let blockers: Vec<String> = parse_dependencies(&item.body)
            .into_iter()
            .filter(|dep| dep != &item.id && open_ids.contains(dep))
            .collect();
        if !blockers.is_empty() {
            debug!(item_id = %item.id, blocked_by = ?blockers, "Skipping item with open dependencies");
            return false;
        }

        true
    }

    fn spawn_handler(&self, item: WorkItem, permit: OwnedSemaphorePermit, cancel: CancellationToken) {
        let handler = Arc::clone(&self.handler);
        let failures = Arc::clone(&self.handler_failures);
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        POLLER_DISPATCHED.inc();

        debug!(item_id = %item.id, title = %item.title, "Dispatching work item");
        tokio::spawn(async move {
            let _permit = permit;
            let item_id = item.id.clone();
            if let Err(e) = handler.handle(item, cancel).await {
                failures.fetch_add(1, Ordering::Relaxed);
                POLLER_HANDLER_FAILURES.inc();
                warn!(item_id = %item_id, error = %e, "Work item handler failed");
            }
        });
    }

    fn mark_processed(&self, id: &str) -> bool {
        lock(&self.processed).insert(id.to_string())
    }

    fn unmark(&self, id: &str) {
        lock(&self.processed).remove(id);
    }

    fn rate_limit_deadline(&self) -> Option<DateTime<Utc>> {
        let mut until = lock(&self.rate_limited_until);
        match *until {
            Some(deadline) if Utc::now() < deadline => Some(deadline),
            Some(_) => {
                info!("Rate limit window elapsed, resuming listing");
                *until = None;
                None
            }
            None => None,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
