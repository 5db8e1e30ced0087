//! Poller dispatch integration tests.
//!
//! Concurrency bounds and at-most-once dispatch under load.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use shipyard_core::testing::{fixtures, MockWorkSource};
use shipyard_core::{ItemHandler, Poller, WorkItem};

/// Handler that sleeps and records concurrency and per-item call counts.
#[derive(Default)]
struct SlowHandler {
    delay: Duration,
    active: AtomicUsize,
    peak: AtomicUsize,
    calls: Mutex<HashMap<String, usize>>,
}

impl SlowHandler {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    fn max_calls_per_item(&self) -> usize {
        self.calls.lock().unwrap().values().copied().max().unwrap_or(0)
    }
}

#[async_trait]
impl ItemHandler for SlowHandler {
    async fn handle(&self, item: WorkItem, _cancel: CancellationToken) -> anyhow::Result<()> {
        *self.calls.lock().unwrap().entry(item.id.clone()).or_insert(0) += 1;
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

fn items(n: usize) -> Vec<WorkItem> {
    (1..=n).map(|i| fixtures::work_item(&i.to_string())).collect()
}

#[tokio::test]
async fn test_concurrency_is_bounded() {
    let source = Arc::new(MockWorkSource::new());
    source.set_items(items(20));
    let handler = Arc::new(SlowHandler::new(Duration::from_millis(50)));
    let poller = Poller::new(source, handler.clone(), Duration::from_secs(60))
        .with_max_concurrent(5);

    let started = Instant::now();
    let dispatched = poller.poll_once(&CancellationToken::new()).await;
    poller.wait_for_active().await;
    let elapsed = started.elapsed();

    assert_eq!(dispatched, 20);
    assert_eq!(handler.total_calls(), 20);
    assert!(handler.peak.load(Ordering::SeqCst) <= 5);
    assert!(
        elapsed >= Duration::from_millis(200),
        "20 items through 5 slots at 50ms each took only {:?}",
        elapsed
    );
}

#[tokio::test]
async fn test_concurrent_ticks_dispatch_each_item_once() {
    let source = Arc::new(MockWorkSource::new());
    source.set_items(items(30));
    let handler = Arc::new(SlowHandler::new(Duration::from_millis(5)));
    let poller = Arc::new(
        Poller::new(source, handler.clone(), Duration::from_secs(60)).with_max_concurrent(4),
    );
    let cancel = CancellationToken::new();

    let mut ticks = Vec::new();
    for _ in 0..4 {
        let poller = Arc::clone(&poller);
        let cancel = cancel.clone();
        ticks.push(tokio::spawn(async move { poller.poll_once(&cancel).await }));
    }
    let mut dispatched = 0;
    for tick in ticks {
        dispatched += tick.await.unwrap();
    }
    poller.wait_for_active().await;

    assert_eq!(dispatched, 30);
    assert_eq!(handler.total_calls(), 30);
    assert_eq!(handler.max_calls_per_item(), 1);
    assert_eq!(poller.processed_count(), 30);
}

#[tokio::test]
async fn test_reset_allows_redispatch() {
    let source = Arc::new(MockWorkSource::new());
    source.set_items(items(3));
    let handler = Arc::new(SlowHandler::new(Duration::ZERO));
    let poller = Poller::new(source, handler.clone(), Duration::from_secs(60))
        .with_max_concurrent(2);
    let cancel = CancellationToken::new();

    assert_eq!(poller.poll_once(&cancel).await, 3);
    assert_eq!(poller.poll_once(&cancel).await, 0);

    poller.reset();
    assert_eq!(poller.poll_once(&cancel).await, 3);
    poller.wait_for_active().await;
    assert_eq!(handler.total_calls(), 6);
}
