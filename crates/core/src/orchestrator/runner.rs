//! Task orchestrator implementation.
//!
//! A bounded mpsc queue shared by `max_workers` worker loops. Each worker
//! takes one task at a time and runs it to completion:
//! - Queueing: non-blocking; a full queue drops the task
//! - Execution: in a nested tokio task so a panicking executor only fails
//!   its own task
//! - Exclusion: a running-id set keeps two workers off the same task id

use std::any::Any;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::executor::{ExecutionResult, ProgressSink, Task, TaskExecutor};
use crate::metrics;
use crate::monitor::{Monitor, TaskState};
use crate::notify::Notifier;

use super::config::OrchestratorConfig;
use super::planner::extract_pr_number;
use super::progress::ProgressRouter;
use super::types::{
    OrchestratorError, OrchestratorStatus, PrCreated, PrCreatedListener, ProgressCallback,
    TaskFinishedListener, TaskOutcome,
};

#[derive(Default)]
struct Counters {
    queued: AtomicU64,
    dropped: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    duplicates: AtomicU64,
}

/// Removes a task id from the running set when dropped.
struct RunningGuard {
    running: Arc<Mutex<HashSet<String>>>,
    task_id: String,
}

impl RunningGuard {
    fn acquire(running: &Arc<Mutex<HashSet<String>>>, task_id: &str) -> Option<Self> {
        let inserted = running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(task_id.to_string());
        inserted.then(|| Self {
            running: Arc::clone(running),
            task_id: task_id.to_string(),
        })
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.task_id);
    }
}

/// Everything a worker loop needs, cloned per worker.
#[derive(Clone)]
struct Worker {
    executor: Arc<dyn TaskExecutor>,
    monitor: Arc<Monitor>,
    notifiers: Arc<Vec<Arc<dyn Notifier>>>,
    pr_listeners: Arc<Vec<Arc<dyn PrCreatedListener>>>,
    finish_listeners: Arc<Vec<Arc<dyn TaskFinishedListener>>>,
    callbacks: Arc<RwLock<Vec<ProgressCallback>>>,
    receiver: Arc<AsyncMutex<mpsc::Receiver<Task>>>,
    running_tasks: Arc<Mutex<HashSet<String>>>,
    counters: Arc<Counters>,
    progress_step: u8,
    cancel: CancellationToken,
}

/// Runs planned tasks on a fixed pool of workers.
pub struct Orchestrator {
    config: OrchestratorConfig,
    executor: Arc<dyn TaskExecutor>,
    monitor: Arc<Monitor>,
    notifiers: Vec<Arc<dyn Notifier>>,
    pr_listeners: Vec<Arc<dyn PrCreatedListener>>,
    finish_listeners: Vec<Arc<dyn TaskFinishedListener>>,
    callbacks: Arc<RwLock<Vec<ProgressCallback>>>,
    sender: Mutex<Option<mpsc::Sender<Task>>>,
    receiver: Arc<AsyncMutex<mpsc::Receiver<Task>>>,
    running_tasks: Arc<Mutex<HashSet<String>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
    cancel: CancellationToken,
    running: AtomicBool,
    stopped: AtomicBool,
}

impl Orchestrator {
    /// Create an orchestrator. Workers start with [`start`](Self::start).
    pub fn new(
        config: OrchestratorConfig,
        executor: Arc<dyn TaskExecutor>,
        monitor: Arc<Monitor>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        Self {
            config,
            executor,
            monitor,
            notifiers: Vec::new(),
            pr_listeners: Vec::new(),
            finish_listeners: Vec::new(),
            callbacks: Arc::new(RwLock::new(Vec::new())),
            sender: Mutex::new(Some(tx)),
            receiver: Arc::new(AsyncMutex::new(rx)),
            running_tasks: Arc::new(Mutex::new(HashSet::new())),
            workers: Mutex::new(Vec::new()),
            counters: Arc::new(Counters::default()),
            cancel: CancellationToken::new(),
            running: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    pub fn with_pr_listener(mut self, listener: Arc<dyn PrCreatedListener>) -> Self {
        self.pr_listeners.push(listener);
        self
    }

    pub fn with_finish_listener(mut self, listener: Arc<dyn TaskFinishedListener>) -> Self {
        self.finish_listeners.push(listener);
        self
    }

    /// Register a callback invoked on every progress report.
    pub fn on_progress(&self, callback: ProgressCallback) {
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(callback);
    }

    /// Queue a task for execution without blocking.
    ///
    /// The task is registered with the monitor first. If the queue is full
    /// the task is dropped and its monitor entry marked failed.
    pub fn queue_task(&self, task: Task) -> Result<(), OrchestratorError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(OrchestratorError::Stopped);
        }

        let registered = self.monitor.register(&task.id, &task.title);
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(sender) = sender else {
            if registered {
                self.monitor.fail(&task.id, "orchestrator stopped");
            }
            return Err(OrchestratorError::Stopped);
        };

        match sender.try_send(task) {
            Ok(()) => {
                self.counters.queued.fetch_add(1, Ordering::Relaxed);
                metrics::TASKS_QUEUED.inc();
                Ok(())
            }
            Err(TrySendError::Full(task)) => {
                warn!(
                    task_id = %task.id,
                    capacity = self.config.queue_capacity,
                    "Task queue full, dropping task"
                );
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::TASKS_DROPPED.inc();
                if registered {
                    self.monitor.fail(&task.id, "dropped: task queue full");
                }
                Err(OrchestratorError::QueueFull(task.id))
            }
            Err(TrySendError::Closed(task)) => {
                metrics::TASKS_DROPPED.inc();
                if registered {
                    self.monitor.fail(&task.id, "orchestrator stopped");
                }
                Err(OrchestratorError::Stopped)
            }
        }
    }

    /// Spawn the worker pool. Calling this twice, or after `stop`, is a no-op.
    pub fn start(&self) {
        if self.stopped.load(Ordering::SeqCst) {
            warn!("Orchestrator already stopped");
            return;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Orchestrator already running");
            return;
        }

        let worker = Worker {
            executor: Arc::clone(&self.executor),
            monitor: Arc::clone(&self.monitor),
            notifiers: Arc::new(self.notifiers.clone()),
            pr_listeners: Arc::new(self.pr_listeners.clone()),
            finish_listeners: Arc::new(self.finish_listeners.clone()),
            callbacks: Arc::clone(&self.callbacks),
            receiver: Arc::clone(&self.receiver),
            running_tasks: Arc::clone(&self.running_tasks),
            counters: Arc::clone(&self.counters),
            progress_step: self.config.progress_notify_step,
            cancel: self.cancel.clone(),
        };

        let count = self.config.max_workers.max(1);
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        for worker_id in 0..count {
            let worker = worker.clone();
            workers.push(tokio::spawn(async move { worker.run(worker_id).await }));
        }

        info!(
            workers = count,
            queue_capacity = self.config.queue_capacity,
            "Orchestrator started"
        );
    }

    /// Stop accepting tasks, cancel running executions and wait for workers.
    ///
    /// Tasks still queued are marked failed in the monitor.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Stopping orchestrator");

        self.cancel.cancel();
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let handles: Vec<JoinHandle<()>> = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker exited abnormally");
            }
        }

        let mut receiver = self.receiver.lock().await;
        let mut leftover = Vec::new();
        while let Ok(task) = receiver.try_recv() {
            self.monitor.fail(&task.id, "orchestrator stopped");
            leftover.push(task);
        }
        receiver.close();
        drop(receiver);

        for task in &leftover {
            for listener in &self.finish_listeners {
                listener.on_task_finished(task, TaskOutcome::Abandoned).await;
            }
        }
        let abandoned = leftover.len();

        self.running.store(false, Ordering::SeqCst);
        info!(abandoned, "Orchestrator stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> OrchestratorStatus {
        let queued = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|s| s.max_capacity() - s.capacity())
            .unwrap_or(0);
        let running_tasks = self
            .running_tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();

        OrchestratorStatus {
            running: self.is_running(),
            workers: self.config.max_workers.max(1),
            queue_capacity: self.config.queue_capacity.max(1),
            queued,
            running_tasks,
            total_queued: self.counters.queued.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            duplicates_skipped: self.counters.duplicates.load(Ordering::Relaxed),
        }
    }

    pub fn get_task_states(&self) -> Vec<TaskState> {
        self.monitor.get_all()
    }

    pub fn get_running_tasks(&self) -> Vec<TaskState> {
        self.monitor.get_running()
    }

    pub fn monitor(&self) -> &Arc<Monitor> {
        &self.monitor
    }
}

impl Worker {
    async fn run(self, worker_id: usize) {
        debug!(worker_id, "Worker started");
        loop {
            let next = {
                let mut receiver = self.receiver.lock().await;
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => None,
                    task = receiver.recv() => task,
                }
            };
            let Some(task) = next else { break };
            self.run_task(task).await;
        }
        debug!(worker_id, "Worker exited");
    }

    async fn run_task(&self, task: Task) {
        let Some(_guard) = RunningGuard::acquire(&self.running_tasks, &task.id) else {
            warn!(task_id = %task.id, "Task already running, skipping duplicate");
            self.counters.duplicates.fetch_add(1, Ordering::Relaxed);
            metrics::TASKS_FINISHED.with_label_values(&["duplicate"]).inc();
            return;
        };

        self.monitor.start(&task.id);
        metrics::TASKS_RUNNING.inc();
        info!(task_id = %task.id, title = %task.title, "Task started");
        for notifier in self.notifiers.iter() {
            if let Err(e) = notifier.task_started(&task.id, &task.title).await {
                warn!(task_id = %task.id, error = %e, "Start notification failed");
            }
        }

        let sink: Arc<dyn ProgressSink> = Arc::new(ProgressRouter::new(
            Arc::clone(&self.monitor),
            Arc::clone(&self.callbacks),
            Arc::clone(&self.notifiers),
            self.progress_step,
        ));
        let executor = Arc::clone(&self.executor);
        let cancel = self.cancel.child_token();
        let spawned = task.clone();
        let started = Instant::now();

        let joined =
            tokio::spawn(async move { executor.execute(&spawned, sink, cancel).await }).await;

        metrics::TASKS_RUNNING.dec();
        let elapsed = started.elapsed();

        let outcome = match joined {
            Ok(Ok(result)) if result.success => Ok(result),
            Ok(Ok(result)) => Err(result
                .error
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| "task failed".to_string())),
            Ok(Err(e)) => Err(e.to_string()),
            Err(e) if e.is_panic() => Err(format!(
                "executor panicked: {}",
                panic_message(e.into_panic())
            )),
            Err(e) => Err(format!("executor task aborted: {}", e)),
        };

        match outcome {
            Ok(result) => {
                metrics::TASK_DURATION
                    .with_label_values(&["completed"])
                    .observe(elapsed.as_secs_f64());
                self.finish_success(&task, result).await;
            }
            Err(message) => {
                metrics::TASK_DURATION
                    .with_label_values(&["failed"])
                    .observe(elapsed.as_secs_f64());
                self.finish_failure(&task, &message).await;
            }
        }
    }

    async fn finish_success(&self, task: &Task, result: ExecutionResult) {
        self.monitor.complete(&task.id, result.pr_url.clone());
        self.counters.completed.fetch_add(1, Ordering::Relaxed);
        metrics::TASKS_FINISHED.with_label_values(&["completed"]).inc();
        info!(
            task_id = %task.id,
            pr_url = result.pr_url.as_deref().unwrap_or("-"),
            "Task completed"
        );

        for notifier in self.notifiers.iter() {
            if let Err(e) = notifier
                .task_completed(&task.id, &task.title, result.pr_url.as_deref())
                .await
            {
                warn!(task_id = %task.id, error = %e, "Completion notification failed");
            }
        }
        for listener in self.finish_listeners.iter() {
            listener.on_task_finished(task, TaskOutcome::Completed).await;
        }

        let Some(pr_url) = result.pr_url else { return };
        let Some(pr_number) = extract_pr_number(&pr_url) else {
            warn!(task_id = %task.id, pr_url = %pr_url, "Could not parse pull request number");
            return;
        };

        let event = PrCreated {
            pr_number,
            pr_url,
            source_id: task.source_id.clone(),
            task_id: task.id.clone(),
            commit_sha: result.commit_sha,
            branch: task.branch.clone(),
        };
        for listener in self.pr_listeners.iter() {
            listener.on_pr_created(event.clone()).await;
        }
    }

    async fn finish_failure(&self, task: &Task, message: &str) {
        self.monitor.fail(&task.id, message);
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
        metrics::TASKS_FINISHED.with_label_values(&["failed"]).inc();
        warn!(task_id = %task.id, error = %message, "Task failed");

        for notifier in self.notifiers.iter() {
            if let Err(e) = notifier.task_failed(&task.id, &task.title, message).await {
                warn!(task_id = %task.id, error = %e, "Failure notification failed");
            }
        }
        for listener in self.finish_listeners.iter() {
            listener.on_task_finished(task, TaskOutcome::Failed).await;
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::TaskPhase;
    use crate::testing::{
        fixtures, wait_until, MockExecutor, MockFinishListener, MockNotifier, MockPrListener,
    };
    use std::time::Duration;

    fn config(workers: usize, capacity: usize) -> OrchestratorConfig {
        OrchestratorConfig {
            max_workers: workers,
            queue_capacity: capacity,
            ..Default::default()
        }
    }

    fn orchestrator(executor: Arc<MockExecutor>, workers: usize, capacity: usize) -> Orchestrator {
        Orchestrator::new(config(workers, capacity), executor, Arc::new(Monitor::new()))
    }

    async fn wait_for_terminal(orch: &Orchestrator, ids: &[&str]) {
        let done = wait_until(Duration::from_secs(5), || {
            ids.iter().all(|id| {
                orch.monitor()
                    .get(id)
                    .map(|s| s.phase.is_terminal())
                    .unwrap_or(false)
            })
        })
        .await;
        assert!(done, "tasks did not finish in time");
    }

    #[tokio::test]
    async fn test_completed_task_publishes_pr() {
        let executor = Arc::new(MockExecutor::new());
        executor.set_result(
            "t1",
            ExecutionResult::success()
                .with_pr_url("https://github.com/acme/app/pull/42")
                .with_commit_sha("abc123"),
        );
        let notifier = Arc::new(MockNotifier::new());
        let listener = Arc::new(MockPrListener::new());
        let orch = orchestrator(Arc::clone(&executor), 1, 10)
            .with_notifier(notifier.clone())
            .with_pr_listener(listener.clone());

        orch.start();
        orch.queue_task(fixtures::task("t1")).unwrap();
        wait_for_terminal(&orch, &["t1"]).await;

        let state = orch.monitor().get("t1").unwrap();
        assert_eq!(state.phase, TaskPhase::Completed);
        assert_eq!(state.pr_url.as_deref(), Some("https://github.com/acme/app/pull/42"));

        assert!(wait_until(Duration::from_secs(2), || !listener.events().is_empty()).await);
        let events = listener.events();
        assert_eq!(events[0].pr_number, 42);
        assert_eq!(events[0].task_id, "t1");
        assert_eq!(events[0].commit_sha.as_deref(), Some("abc123"));
        assert_eq!(notifier.events(), vec!["started:t1", "completed:t1"]);

        orch.stop().await;
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let executor = Arc::new(MockExecutor::new());
        executor.set_result("bad", ExecutionResult::failure("build failed"));
        let orch = orchestrator(Arc::clone(&executor), 2, 10);

        orch.start();
        for id in ["a", "bad", "b"] {
            orch.queue_task(fixtures::task(id)).unwrap();
        }
        wait_for_terminal(&orch, &["a", "bad", "b"]).await;

        let bad = orch.monitor().get("bad").unwrap();
        assert_eq!(bad.phase, TaskPhase::Failed);
        assert_eq!(bad.error.as_deref(), Some("build failed"));
        assert_eq!(orch.monitor().get("a").unwrap().phase, TaskPhase::Completed);
        assert_eq!(orch.monitor().get("b").unwrap().phase, TaskPhase::Completed);

        let status = orch.status();
        assert_eq!(status.completed, 2);
        assert_eq!(status.failed, 1);
        orch.stop().await;
    }

    #[tokio::test]
    async fn test_finish_listeners_see_every_outcome() {
        let executor = Arc::new(MockExecutor::new().with_delay(Duration::from_millis(200)));
        executor.set_result("bad", ExecutionResult::failure("lint failed"));
        let listener = Arc::new(MockFinishListener::new());
        let orch = orchestrator(Arc::clone(&executor), 1, 10).with_finish_listener(listener.clone());

        orch.start();
        for id in ["ok", "bad", "late"] {
            orch.queue_task(fixtures::task(id)).unwrap();
        }
        wait_for_terminal(&orch, &["ok", "bad"]).await;
        orch.stop().await;

        let outcomes = listener.outcomes();
        assert_eq!(outcomes[0], ("ok".to_string(), TaskOutcome::Completed));
        assert_eq!(outcomes[1], ("bad".to_string(), TaskOutcome::Failed));
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[2].0, "late");
    }

    #[tokio::test]
    async fn test_full_queue_drops_task() {
        let executor = Arc::new(MockExecutor::new());
        let orch = orchestrator(executor, 1, 2);

        orch.queue_task(fixtures::task("a")).unwrap();
        orch.queue_task(fixtures::task("b")).unwrap();
        let err = orch.queue_task(fixtures::task("c")).unwrap_err();
        assert!(matches!(err, OrchestratorError::QueueFull(ref id) if id == "c"));

        let dropped = orch.monitor().get("c").unwrap();
        assert_eq!(dropped.phase, TaskPhase::Failed);
        assert!(dropped.error.unwrap().contains("queue full"));

        let status = orch.status();
        assert_eq!(status.queued, 2);
        assert_eq!(status.dropped, 1);
    }

    #[tokio::test]
    async fn test_worker_count_bounds_concurrency() {
        let executor = Arc::new(MockExecutor::new().with_delay(Duration::from_millis(50)));
        let orch = orchestrator(Arc::clone(&executor), 2, 10);

        orch.start();
        let ids: Vec<String> = (0..6).map(|i| format!("t{}", i)).collect();
        for id in &ids {
            orch.queue_task(fixtures::task(id)).unwrap();
        }
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        wait_for_terminal(&orch, &refs).await;

        assert!(executor.peak_concurrency() <= 2);
        assert_eq!(executor.total_executions(), 6);
        orch.stop().await;
    }

    #[tokio::test]
    async fn test_same_task_never_runs_concurrently() {
        let executor = Arc::new(MockExecutor::new().with_delay(Duration::from_millis(100)));
        let orch = orchestrator(Arc::clone(&executor), 3, 10);

        orch.start();
        for _ in 0..3 {
            orch.queue_task(fixtures::task("same")).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        wait_for_terminal(&orch, &["same"]).await;
        orch.stop().await;

        assert_eq!(executor.peak_concurrency_for("same"), 1);
    }

    #[tokio::test]
    async fn test_panicking_executor_fails_only_its_task() {
        let executor = Arc::new(MockExecutor::new());
        executor.set_panic("boom");
        let orch = orchestrator(Arc::clone(&executor), 1, 10);

        orch.start();
        orch.queue_task(fixtures::task("boom")).unwrap();
        orch.queue_task(fixtures::task("fine")).unwrap();
        wait_for_terminal(&orch, &["boom", "fine"]).await;

        let boom = orch.monitor().get("boom").unwrap();
        assert_eq!(boom.phase, TaskPhase::Failed);
        assert!(boom.error.unwrap().starts_with("executor panicked"));
        assert_eq!(orch.monitor().get("fine").unwrap().phase, TaskPhase::Completed);
        orch.stop().await;
    }

    #[tokio::test]
    async fn test_stop_abandons_queued_tasks() {
        let executor = Arc::new(MockExecutor::new().with_delay(Duration::from_millis(300)));
        let orch = orchestrator(Arc::clone(&executor), 1, 10);

        orch.start();
        for id in ["a", "b", "c"] {
            orch.queue_task(fixtures::task(id)).unwrap();
        }
        assert!(wait_until(Duration::from_secs(2), || executor.total_executions() == 1).await);

        orch.stop().await;
        assert!(!orch.is_running());

        for id in ["a", "b", "c"] {
            assert_eq!(orch.monitor().get(id).unwrap().phase, TaskPhase::Failed);
        }
        assert_eq!(executor.total_executions(), 1);
        assert!(matches!(
            orch.queue_task(fixtures::task("d")),
            Err(OrchestratorError::Stopped)
        ));
    }

    #[tokio::test]
    async fn test_progress_reaches_callbacks_and_monitor() {
        let executor =
            Arc::new(MockExecutor::new().with_progress(vec![10, 25, 60, 100]));
        let notifier = Arc::new(MockNotifier::new());
        let orch = orchestrator(Arc::clone(&executor), 1, 10).with_notifier(notifier.clone());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        orch.on_progress(Arc::new(move |_id: &str, _step: &str, percent: u8, _msg: &str| {
            sink.lock().unwrap().push(percent);
        }));

        orch.start();
        orch.queue_task(fixtures::task("p")).unwrap();
        wait_for_terminal(&orch, &["p"]).await;

        assert_eq!(seen.lock().unwrap().clone(), vec![10, 25, 60, 100]);
        assert_eq!(notifier.progress_percents("p"), vec![25, 100]);
        orch.stop().await;
    }
}
