//! Pipeline tasks and their de-duplication rule.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Evaluate recommenders and decide which become active.
    Selection,
    /// Train the active recommenders.
    Training,
    /// Compute suggestions with the trained recommenders.
    Prediction,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskKind::Selection => "selection",
            TaskKind::Training => "training",
            TaskKind::Prediction => "prediction",
        };
        f.write_str(name)
    }
}

/// Outcome of comparing a newly submitted task with a queued one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
    NoMatch,
    /// Drop the queued task and queue the new one instead.
    QueueThis,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub kind: TaskKind,
    pub user: String,
    pub project_id: i64,
    /// Why the task was scheduled. Diagnostic only.
    pub trigger: String,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        kind: TaskKind,
        user: impl Into<String>,
        project_id: i64,
        trigger: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            kind,
            user: user.into(),
            project_id,
            trigger: trigger.into(),
            created_at: Utc::now(),
        }
    }

    pub fn selection(user: impl Into<String>, project_id: i64, trigger: impl Into<String>) -> Self {
        Self::new(TaskKind::Selection, user, project_id, trigger)
    }

    pub fn training(user: impl Into<String>, project_id: i64, trigger: impl Into<String>) -> Self {
        Self::new(TaskKind::Training, user, project_id, trigger)
    }

    pub fn prediction(user: impl Into<String>, project_id: i64, trigger: impl Into<String>) -> Self {
        Self::new(TaskKind::Prediction, user, project_id, trigger)
    }

    /// (user, project) the task works on.
    pub fn scope(&self) -> (&str, i64) {
        (&self.user, self.project_id)
    }

    /// A queued task of the same kind for the same (user, project) is
    /// superseded by this one.
    pub fn matches(&self, queued: &Task) -> MatchResult {
        if self.kind == queued.kind && self.scope() == queued.scope() {
            MatchResult::QueueThis
        } else {
            MatchResult::NoMatch
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [user={}, project={}, trigger={}]",
            self.kind, self.user, self.project_id, self.trigger
        )
    }
}
