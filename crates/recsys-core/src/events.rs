//! Domain events and the broadcast event bus.
//!
//! Pipeline stages and the active-learning service publish [`ServerEvent`]s
//! on an [`EventBus`]. Each event is wrapped in an [`EventEnvelope`] carrying
//! a UUIDv7 id, a timestamp and the actor that caused it. Publication is
//! fire-and-forget: without subscribers events are dropped, and slow
//! subscribers see `Lagged` instead of blocking the publisher.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::learning::{ChangeLocation, UserAction};

// ============================================================================
// Envelope
// ============================================================================

/// Who or what caused an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventActor {
    /// `"system"` or `"user"`.
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl EventActor {
    /// Background tasks.
    pub fn system() -> Self {
        Self {
            kind: "system".to_string(),
            id: None,
        }
    }

    pub fn user(id: impl Into<String>) -> Self {
        Self {
            kind: "user".to_string(),
            id: Some(id.into()),
        }
    }
}

/// Optional metadata attached when emitting.
#[derive(Debug, Clone, Default)]
pub struct EventContext {
    /// Defaults to the system actor.
    pub actor: Option<EventActor>,
    /// Correlates events of one pipeline run.
    pub correlation_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    /// UUIDv7, so ids sort by emission time.
    pub event_id: Uuid,
    /// Namespaced type, e.g. `"recommender.evaluated"`.
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
    pub actor: EventActor,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
    pub payload: ServerEvent,
}

impl EventEnvelope {
    pub fn new(event: ServerEvent) -> Self {
        Self::with_context(event, EventContext::default())
    }

    pub fn with_context(event: ServerEvent, ctx: EventContext) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            event_type: event.event_type().to_string(),
            occurred_at: Utc::now(),
            actor: ctx.actor.unwrap_or_else(EventActor::system),
            correlation_id: ctx.correlation_id,
            payload: event,
        }
    }
}

// ============================================================================
// Events
// ============================================================================

/// Domain events, serialized with a `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// The selection stage decided whether a recommender becomes active.
    RecommenderEvaluated {
        user: String,
        project_id: i64,
        layer_id: i64,
        recommender_id: i64,
        recommender_name: String,
        active: bool,
        /// F1 score; absent when evaluation was skipped.
        #[serde(skip_serializing_if = "Option::is_none")]
        score: Option<f64>,
        threshold: f64,
        duration_ms: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        skip_reason: Option<String>,
    },
    /// New incoming predictions are available.
    PredictionsComputed {
        user: String,
        project_id: i64,
        generation: i32,
        suggestions: usize,
        added: usize,
        aged: usize,
        removed: usize,
        duration_ms: i64,
    },
    /// Incoming predictions became active.
    PredictionsSwitched {
        user: String,
        project_id: i64,
        generation: i32,
    },
    /// The user (or auto-accept) acted on a suggestion.
    SuggestionAction {
        user: String,
        project_id: i64,
        document_name: String,
        recommender_id: i64,
        suggestion_id: i32,
        #[serde(skip_serializing_if = "Option::is_none")]
        label: Option<String>,
        action: UserAction,
        location: ChangeLocation,
    },
}

impl ServerEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            ServerEvent::RecommenderEvaluated { .. } => "recommender.evaluated",
            ServerEvent::PredictionsComputed { .. } => "predictions.computed",
            ServerEvent::PredictionsSwitched { .. } => "predictions.switched",
            ServerEvent::SuggestionAction { .. } => "suggestion.action",
        }
    }

    /// (user, project) the event belongs to.
    pub fn scope(&self) -> (&str, i64) {
        match self {
            ServerEvent::RecommenderEvaluated {
                user, project_id, ..
            }
            | ServerEvent::PredictionsComputed {
                user, project_id, ..
            }
            | ServerEvent::PredictionsSwitched {
                user, project_id, ..
            }
            | ServerEvent::SuggestionAction {
                user, project_id, ..
            } => (user.as_str(), *project_id),
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit with the system actor.
    pub fn emit(&self, event: ServerEvent) {
        self.send(EventEnvelope::new(event));
    }

    pub fn emit_with_context(&self, event: ServerEvent, ctx: EventContext) {
        self.send(EventEnvelope::with_context(event, ctx));
    }

    fn send(&self, envelope: EventEnvelope) {
        tracing::debug!(
            event_type = %envelope.event_type,
            event_id = %envelope.event_id,
            subscriber_count = self.tx.receiver_count(),
            "EventBus emit"
        );
        let _ = self.tx.send(envelope);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::defaults::EVENT_BUS_CAPACITY)
    }
}
