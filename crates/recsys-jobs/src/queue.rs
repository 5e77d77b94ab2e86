//! Coalescing task queue.
//!
//! - Submitting a task that [matches](Task::matches) a queued one replaces it,
//!   so bursts of triggers collapse into a single run.
//! - A task is only handed out when no other task for the same
//!   (user, project) is running. The stages of one pair therefore run one
//!   after another, while different pairs run concurrently.
//! - Queued tasks can be cancelled outright; running tasks get their
//!   [`CancellationFlag`] raised and stop at the next checkpoint.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tracing::debug;
use uuid::Uuid;

use recsys_core::{Error, Result};

use crate::task::{MatchResult, Task};

/// Raised when the task holding it should stop.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What happened to a submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued(Uuid),
    /// The task superseded a queued one with the given id.
    Replaced { replaced: Uuid, queued: Uuid },
}

/// A task handed out by [`TaskQueue::claim_next`].
#[derive(Debug, Clone)]
pub struct ClaimedTask {
    pub task: Task,
    pub cancel: CancellationFlag,
}

#[derive(Debug, Default)]
struct QueueState {
    queued: VecDeque<Task>,
    running: HashMap<Uuid, ClaimedTask>,
    closed: bool,
}

impl QueueState {
    fn scope_running(&self, task: &Task) -> bool {
        self.running
            .values()
            .any(|r| r.task.scope() == task.scope())
    }
}

#[derive(Debug, Default)]
pub struct TaskQueue {
    state: Mutex<QueueState>,
    changed: Notify,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Submit a task, replacing a queued task it matches.
    pub async fn enqueue(&self, task: Task) -> Result<EnqueueOutcome> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(Error::Task(format!("Queue is closed, dropping {}", task)));
        }

        let existing = state
            .queued
            .iter()
            .position(|queued| task.matches(queued) == MatchResult::QueueThis);
        let outcome = match existing.and_then(|idx| state.queued.remove(idx)) {
            Some(replaced) => {
                debug!(
                    task_id = %task.id,
                    replaced_id = %replaced.id,
                    task_kind = %task.kind,
                    "Replacing queued task"
                );
                EnqueueOutcome::Replaced {
                    replaced: replaced.id,
                    queued: task.id,
                }
            }
            None => {
                debug!(task_id = %task.id, task_kind = %task.kind, user = %task.user,
                    project_id = task.project_id, "Task queued");
                EnqueueOutcome::Queued(task.id)
            }
        };
        state.queued.push_back(task);
        drop(state);
        self.changed.notify_waiters();
        Ok(outcome)
    }

    /// Take the oldest queued task whose (user, project) has nothing running.
    pub async fn claim_next(&self) -> Option<ClaimedTask> {
        let mut state = self.state.lock().await;
        let idx = state
            .queued
            .iter()
            .position(|task| !state.scope_running(task))?;
        let task = state.queued.remove(idx)?;
        let claimed = ClaimedTask {
            task,
            cancel: CancellationFlag::new(),
        };
        state.running.insert(claimed.task.id, claimed.clone());
        Some(claimed)
    }

    /// Mark a claimed task as finished, whatever its outcome.
    pub async fn complete(&self, task_id: Uuid) {
        self.state.lock().await.running.remove(&task_id);
        self.changed.notify_waiters();
    }

    /// Drop queued tasks and flag running tasks matching `predicate`.
    /// Returns the number of tasks affected.
    async fn cancel_where(&self, predicate: impl Fn(&Task) -> bool) -> usize {
        let mut state = self.state.lock().await;
        let before = state.queued.len();
        state.queued.retain(|task| !predicate(task));
        let mut affected = before - state.queued.len();
        for running in state.running.values() {
            if predicate(&running.task) && !running.cancel.is_cancelled() {
                running.cancel.cancel();
                affected += 1;
            }
        }
        drop(state);
        self.changed.notify_waiters();
        affected
    }

    /// Cancel every task of a project.
    pub async fn cancel_project(&self, project_id: i64) -> usize {
        let affected = self.cancel_where(|t| t.project_id == project_id).await;
        debug!(project_id, affected, "Cancelled project tasks");
        affected
    }

    /// Cancel every task of one user in a project.
    pub async fn cancel_user_project(&self, user: &str, project_id: i64) -> usize {
        let affected = self.cancel_where(|t| t.scope() == (user, project_id)).await;
        debug!(user, project_id, affected, "Cancelled user tasks");
        affected
    }

    /// Refuse further submissions. Queued tasks stay claimable.
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
        self.changed.notify_waiters();
    }

    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.queued.len()
    }

    pub async fn running_count(&self) -> usize {
        self.state.lock().await.running.len()
    }

    /// Snapshot of the queued tasks, oldest first.
    pub async fn queued_tasks(&self) -> Vec<Task> {
        self.state.lock().await.queued.iter().cloned().collect()
    }

    pub async fn is_idle(&self) -> bool {
        let state = self.state.lock().await;
        state.queued.is_empty() && state.running.is_empty()
    }

    /// Resolves on the next submission, completion or cancellation.
    pub async fn changed(&self) {
        self.changed.notified().await;
    }

    /// Wait until nothing is queued or running. Returns false on timeout.
    pub async fn wait_until_idle(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.changed.notified();
                if self.is_idle().await {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok()
    }
}
