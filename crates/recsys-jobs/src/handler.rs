//! Task handlers for each task kind.

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use recsys_core::{Error, Result};

use crate::queue::CancellationFlag;
use crate::task::{Task, TaskKind};

/// Progress callback type for task handlers.
pub type ProgressCallback = Box<dyn Fn(i32, Option<&str>) + Send + Sync>;

/// Context provided to task handlers.
pub struct TaskContext {
    /// The task being processed.
    pub task: Task,
    cancel: CancellationFlag,
    progress_callback: Option<ProgressCallback>,
}

impl TaskContext {
    pub fn new(task: Task) -> Self {
        Self {
            task,
            cancel: CancellationFlag::new(),
            progress_callback: None,
        }
    }

    /// Observe `cancel` instead of a private flag.
    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(i32, Option<&str>) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Box::new(callback));
        self
    }

    pub fn report_progress(&self, percent: i32, message: Option<&str>) {
        if let Some(ref callback) = self.progress_callback {
            callback(percent, message);
        }
    }

    pub fn user(&self) -> &str {
        &self.task.user
    }

    pub fn project_id(&self) -> i64 {
        self.task.project_id
    }

    pub fn cancellation(&self) -> &CancellationFlag {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// `Err(Error::Cancelled)` once the task was cancelled.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Result of task execution.
#[derive(Debug)]
pub enum TaskResult {
    /// Completed with an optional summary.
    Success(Option<JsonValue>),
    Failed(String),
    /// Stopped at a checkpoint after cancellation.
    Cancelled,
}

impl From<Result<JsonValue>> for TaskResult {
    fn from(result: Result<JsonValue>) -> Self {
        match result {
            Ok(summary) => TaskResult::Success(Some(summary)),
            Err(Error::Cancelled) => TaskResult::Cancelled,
            Err(e) => TaskResult::Failed(e.to_string()),
        }
    }
}

#[async_trait]
pub trait TaskHandler: Send + Sync {
    fn task_kind(&self) -> TaskKind;

    async fn execute(&self, ctx: TaskContext) -> TaskResult;

    fn can_handle(&self, kind: TaskKind) -> bool {
        self.task_kind() == kind
    }
}
