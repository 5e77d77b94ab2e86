//! Task worker pulling pipeline tasks off the [`TaskQueue`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use recsys_core::defaults;
use recsys_core::{Error, Result};

use crate::handler::{TaskContext, TaskHandler, TaskResult};
use crate::queue::{ClaimedTask, TaskQueue};
use crate::task::TaskKind;

/// Configuration for the task worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Polling interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Maximum number of concurrent tasks.
    pub max_concurrent_tasks: usize,
    /// Hard limit for a single task, in seconds.
    pub task_timeout_secs: u64,
    pub enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: defaults::TASK_POLL_INTERVAL_MS,
            max_concurrent_tasks: defaults::TASK_MAX_CONCURRENT,
            task_timeout_secs: defaults::TASK_TIMEOUT_SECS,
            enabled: true,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `RECSYS_WORKER_ENABLED` | `true` | Enable/disable task processing |
    /// | `RECSYS_MAX_CONCURRENT_TASKS` | `4` | Max concurrent tasks |
    /// | `RECSYS_POLL_INTERVAL_MS` | `1000` | Polling interval when the queue is empty |
    /// | `RECSYS_TASK_TIMEOUT_SECS` | `1800` | Per-task timeout |
    pub fn from_env() -> Self {
        let enabled = std::env::var("RECSYS_WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let max_concurrent_tasks = std::env::var("RECSYS_MAX_CONCURRENT_TASKS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::TASK_MAX_CONCURRENT)
            .max(1);

        let poll_interval_ms = std::env::var("RECSYS_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::TASK_POLL_INTERVAL_MS);

        let task_timeout_secs = std::env::var("RECSYS_TASK_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(defaults::TASK_TIMEOUT_SECS);

        Self {
            poll_interval_ms,
            max_concurrent_tasks,
            task_timeout_secs,
            enabled,
        }
    }

    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_tasks = max;
        self
    }

    pub fn with_task_timeout(mut self, secs: u64) -> Self {
        self.task_timeout_secs = secs;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Event emitted by the task worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    TaskStarted {
        task_id: Uuid,
        kind: TaskKind,
    },
    TaskProgress {
        task_id: Uuid,
        percent: i32,
        message: Option<String>,
    },
    TaskCompleted {
        task_id: Uuid,
        kind: TaskKind,
    },
    TaskFailed {
        task_id: Uuid,
        kind: TaskKind,
        error: String,
    },
    TaskCancelled {
        task_id: Uuid,
        kind: TaskKind,
    },
    WorkerStarted,
    WorkerStopped,
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
}

impl WorkerHandle {
    /// Signal the worker to stop claiming; running tasks are finished first.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }

    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }
}

type HandlerMap = Arc<RwLock<HashMap<TaskKind, Arc<dyn TaskHandler>>>>;

pub struct TaskWorker {
    queue: Arc<TaskQueue>,
    config: WorkerConfig,
    handlers: HandlerMap,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl TaskWorker {
    pub fn new(queue: Arc<TaskQueue>, config: WorkerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        Self {
            queue,
            config,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
        }
    }

    pub async fn register_handler<H: TaskHandler + 'static>(&self, handler: H) {
        let kind = handler.task_kind();
        self.handlers.write().await.insert(kind, Arc::new(handler));
        debug!(task_kind = %kind, "Registered task handler");
    }

    /// Start the worker and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();

        tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });

        WorkerHandle {
            shutdown_tx,
            event_rx,
        }
    }

    /// Keeps up to `max_concurrent_tasks` running. A finished task frees its
    /// slot for the next claim right away, so a long task of one
    /// (user, project) never holds back the others. A queue change wakes the
    /// loop early; the poll interval bounds missed wake-ups.
    #[instrument(skip(self, shutdown_rx))]
    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!("Task worker is disabled, not starting");
            return;
        }

        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            max_concurrent = self.config.max_concurrent_tasks,
            "Task worker started"
        );
        let _ = self.event_tx.send(WorkerEvent::WorkerStarted);

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let max_concurrent = self.config.max_concurrent_tasks.max(1);
        let mut tasks = tokio::task::JoinSet::new();

        loop {
            while tasks.len() < max_concurrent {
                let Some(task) = self.queue.claim_next().await else {
                    break;
                };
                let worker = self.clone_refs();
                tasks.spawn(async move {
                    worker.execute_task(task).await;
                });
                debug!(running = tasks.len(), "Task slot filled");
            }

            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Task worker received shutdown signal");
                    break;
                }
                Some(result) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = result {
                        error!(error = ?e, "Task panicked");
                    }
                }
                _ = self.queue.changed() => {}
                _ = sleep(poll_interval) => {}
            }
        }

        if !tasks.is_empty() {
            info!(running = tasks.len(), "Waiting for running tasks before stopping");
        }
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(error = ?e, "Task panicked");
            }
        }

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
        info!("Task worker stopped");
    }

    fn clone_refs(&self) -> TaskWorkerRef {
        TaskWorkerRef {
            queue: self.queue.clone(),
            handlers: self.handlers.clone(),
            event_tx: self.event_tx.clone(),
            timeout: Duration::from_secs(self.config.task_timeout_secs),
        }
    }

    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }
}

/// Reference bundle for executing one claimed task in a spawned future.
struct TaskWorkerRef {
    queue: Arc<TaskQueue>,
    handlers: HandlerMap,
    event_tx: broadcast::Sender<WorkerEvent>,
    timeout: Duration,
}

impl TaskWorkerRef {
    async fn execute_task(self, claimed: ClaimedTask) {
        let start = Instant::now();
        let ClaimedTask { task, cancel } = claimed;
        let task_id = task.id;
        let kind = task.kind;

        info!(%task_id, task_kind = %kind, user = %task.user, project_id = task.project_id,
            trigger = %task.trigger, "Processing task");
        let _ = self.event_tx.send(WorkerEvent::TaskStarted { task_id, kind });

        let handler = self.handlers.read().await.get(&kind).cloned();

        let result = match handler {
            Some(handler) => {
                let event_tx = self.event_tx.clone();
                let ctx = TaskContext::new(task)
                    .with_cancellation(cancel)
                    .with_progress_callback(move |percent, message| {
                        let _ = event_tx.send(WorkerEvent::TaskProgress {
                            task_id,
                            percent,
                            message: message.map(String::from),
                        });
                    });

                match tokio::time::timeout(self.timeout, handler.execute(ctx)).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(%task_id, task_kind = %kind, "Task exceeded timeout of {}s",
                            self.timeout.as_secs());
                        TaskResult::Failed(format!(
                            "Task exceeded timeout of {}s",
                            self.timeout.as_secs()
                        ))
                    }
                }
            }
            None => {
                warn!(task_kind = %kind, "No handler registered for task kind");
                TaskResult::Failed(format!("No handler for task kind: {}", kind))
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            TaskResult::Success(_) => {
                info!(%task_id, task_kind = %kind, duration_ms, "Task completed successfully");
                let _ = self
                    .event_tx
                    .send(WorkerEvent::TaskCompleted { task_id, kind });
            }
            TaskResult::Cancelled => {
                info!(%task_id, task_kind = %kind, duration_ms, "Task cancelled");
                let _ = self
                    .event_tx
                    .send(WorkerEvent::TaskCancelled { task_id, kind });
            }
            TaskResult::Failed(error) => {
                error!(%task_id, task_kind = %kind, %error, duration_ms, "Task failed");
                let _ = self.event_tx.send(WorkerEvent::TaskFailed {
                    task_id,
                    kind,
                    error,
                });
            }
        }

        // Released after the terminal event so idle waiters see it.
        self.queue.complete(task_id).await;
    }
}

/// Builder for a task worker with handlers.
pub struct WorkerBuilder {
    queue: Arc<TaskQueue>,
    config: WorkerConfig,
    handlers: Vec<Box<dyn TaskHandler>>,
}

impl WorkerBuilder {
    pub fn new(queue: Arc<TaskQueue>) -> Self {
        Self {
            queue,
            config: WorkerConfig::default(),
            handlers: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_handler<H: TaskHandler + 'static>(mut self, handler: H) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    pub async fn build(self) -> TaskWorker {
        let worker = TaskWorker::new(self.queue, self.config);
        {
            let mut handlers = worker.handlers.write().await;
            for handler in self.handlers {
                handlers.insert(handler.task_kind(), Arc::from(handler));
            }
        }
        worker
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_worker_config_default() {
        let config = WorkerConfig::default();
        assert_eq!(config.poll_interval_ms, defaults::TASK_POLL_INTERVAL_MS);
        assert_eq!(config.max_concurrent_tasks, 4);
        assert_eq!(config.task_timeout_secs, defaults::TASK_TIMEOUT_SECS);
        assert!(config.enabled);
    }

    #[test]
    fn test_worker_config_builder() {
        let config = WorkerConfig::default()
            .with_poll_interval(10)
            .with_max_concurrent(8)
            .with_task_timeout(5)
            .with_enabled(false);

        assert_eq!(config.poll_interval_ms, 10);
        assert_eq!(config.max_concurrent_tasks, 8);
        assert_eq!(config.task_timeout_secs, 5);
        assert!(!config.enabled);
    }

    struct Counting {
        kind: TaskKind,
        runs: Arc<AtomicUsize>,
        result: fn() -> TaskResult,
    }

    #[async_trait]
    impl TaskHandler for Counting {
        fn task_kind(&self) -> TaskKind {
            self.kind
        }

        async fn execute(&self, ctx: TaskContext) -> TaskResult {
            ctx.report_progress(100, None);
            self.runs.fetch_add(1, Ordering::SeqCst);
            (self.result)()
        }
    }

    struct Sleepy;

    #[async_trait]
    impl TaskHandler for Sleepy {
        fn task_kind(&self) -> TaskKind {
            TaskKind::Training
        }

        async fn execute(&self, _ctx: TaskContext) -> TaskResult {
            sleep(Duration::from_secs(60)).await;
            TaskResult::Success(None)
        }
    }

    /// Slow for alice, instant for everybody else.
    struct SlowForAlice;

    #[async_trait]
    impl TaskHandler for SlowForAlice {
        fn task_kind(&self) -> TaskKind {
            TaskKind::Training
        }

        async fn execute(&self, ctx: TaskContext) -> TaskResult {
            if ctx.user() == "alice" {
                sleep(Duration::from_secs(2)).await;
            }
            TaskResult::Success(None)
        }
    }

    /// Runs a synchronous call the way pipeline stages run engines.
    struct BlockingCall;

    #[async_trait]
    impl TaskHandler for BlockingCall {
        fn task_kind(&self) -> TaskKind {
            TaskKind::Training
        }

        async fn execute(&self, _ctx: TaskContext) -> TaskResult {
            let outcome = crate::guard::guarded_blocking(|| {
                std::thread::sleep(Duration::from_secs(2));
                Ok(())
            })
            .await;
            match outcome {
                Ok(()) => TaskResult::Success(None),
                Err(e) => TaskResult::Failed(e.to_string()),
            }
        }
    }

    fn fast_config() -> WorkerConfig {
        WorkerConfig::default().with_poll_interval(10)
    }

    #[tokio::test]
    async fn test_worker_runs_queued_tasks() {
        let queue = Arc::new(TaskQueue::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let worker = WorkerBuilder::new(queue.clone())
            .with_config(fast_config())
            .with_handler(Counting {
                kind: TaskKind::Selection,
                runs: runs.clone(),
                result: || TaskResult::Success(None),
            })
            .build()
            .await;
        let handle = worker.start();

        queue.enqueue(Task::selection("alice", 1, "a")).await.unwrap();
        queue.enqueue(Task::selection("bob", 1, "b")).await.unwrap();
        assert!(queue.wait_until_idle(Duration::from_secs(5)).await);
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_handler_fails_task() {
        let queue = Arc::new(TaskQueue::new());
        let worker = WorkerBuilder::new(queue.clone())
            .with_config(fast_config())
            .build()
            .await;
        let mut events = worker.events();
        let handle = worker.start();

        queue.enqueue(Task::prediction("alice", 1, "a")).await.unwrap();
        assert!(queue.wait_until_idle(Duration::from_secs(5)).await);

        loop {
            match events.recv().await.unwrap() {
                WorkerEvent::TaskFailed { error, kind, .. } => {
                    assert_eq!(kind, TaskKind::Prediction);
                    assert!(error.contains("No handler"));
                    break;
                }
                _ => continue,
            }
        }
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_timeout_fails_task() {
        let queue = Arc::new(TaskQueue::new());
        let worker = WorkerBuilder::new(queue.clone())
            .with_config(fast_config().with_task_timeout(1))
            .with_handler(Sleepy)
            .build()
            .await;
        let mut events = worker.events();
        let handle = worker.start();

        queue.enqueue(Task::training("alice", 1, "a")).await.unwrap();

        loop {
            if let WorkerEvent::TaskFailed { error, .. } = events.recv().await.unwrap() {
                assert!(error.contains("timeout"));
                break;
            }
        }
        assert!(queue.wait_until_idle(Duration::from_secs(5)).await);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_freed_slot_is_reused_while_long_task_runs() {
        let queue = Arc::new(TaskQueue::new());
        let worker = WorkerBuilder::new(queue.clone())
            .with_config(fast_config().with_max_concurrent(4))
            .with_handler(SlowForAlice)
            .build()
            .await;
        let mut events = worker.events();
        let handle = worker.start();

        let start = Instant::now();
        queue.enqueue(Task::training("alice", 1, "slow")).await.unwrap();
        sleep(Duration::from_millis(200)).await;
        let bob = Task::training("bob", 1, "fast");
        let bob_id = bob.id;
        queue.enqueue(bob).await.unwrap();

        loop {
            if let WorkerEvent::TaskCompleted { task_id, .. } = events.recv().await.unwrap() {
                assert_eq!(task_id, bob_id);
                break;
            }
        }
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(queue.wait_until_idle(Duration::from_secs(5)).await);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_timeout_fires_during_blocking_call() {
        let queue = Arc::new(TaskQueue::new());
        let worker = WorkerBuilder::new(queue.clone())
            .with_config(fast_config().with_task_timeout(1))
            .with_handler(BlockingCall)
            .build()
            .await;
        let mut events = worker.events();
        let handle = worker.start();

        let start = Instant::now();
        queue.enqueue(Task::training("alice", 1, "a")).await.unwrap();
        loop {
            match events.recv().await.unwrap() {
                WorkerEvent::TaskFailed { error, .. } => {
                    assert!(error.contains("timeout"));
                    break;
                }
                WorkerEvent::TaskCompleted { .. } => panic!("blocking call outlived the timeout"),
                _ => continue,
            }
        }
        assert!(start.elapsed() < Duration::from_millis(1800));
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_disabled_worker_does_not_process() {
        let queue = Arc::new(TaskQueue::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let worker = WorkerBuilder::new(queue.clone())
            .with_config(fast_config().with_enabled(false))
            .with_handler(Counting {
                kind: TaskKind::Selection,
                runs: runs.clone(),
                result: || TaskResult::Success(None),
            })
            .build()
            .await;
        let _handle = worker.start();

        queue.enqueue(Task::selection("alice", 1, "a")).await.unwrap();
        assert!(!queue.wait_until_idle(Duration::from_millis(100)).await);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancelled_result_emits_event() {
        let queue = Arc::new(TaskQueue::new());
        let worker = WorkerBuilder::new(queue.clone())
            .with_config(fast_config())
            .with_handler(Counting {
                kind: TaskKind::Training,
                runs: Arc::new(AtomicUsize::new(0)),
                result: || TaskResult::Cancelled,
            })
            .build()
            .await;
        let mut events = worker.events();
        let handle = worker.start();

        queue.enqueue(Task::training("alice", 1, "a")).await.unwrap();
        loop {
            if let WorkerEvent::TaskCancelled { kind, .. } = events.recv().await.unwrap() {
                assert_eq!(kind, TaskKind::Training);
                break;
            }
        }
        handle.shutdown().await.unwrap();
    }
}
