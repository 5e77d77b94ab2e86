//! # recsys-core
//!
//! Core types, traits, and abstractions for the recsys recommendation
//! pipeline.
//!
//! This crate provides the data model (recommenders, suggestions, predictions,
//! contexts, learning records, evaluation results and splitters), the engine
//! contract and the collaborator traits the other recsys crates depend on.

pub mod cas;
pub mod context;
pub mod defaults;
pub mod engine;
pub mod error;
pub mod evaluation;
pub mod events;
pub mod learning;
pub mod logging;
pub mod models;
pub mod predictions;
pub mod splitter;
pub mod suggestion;
pub mod traits;

// Re-export commonly used types at crate root
pub use cas::{Anchor, Annotation, Cas};
pub use context::{ContextKey, RecommenderContext};
pub use engine::{
    PredictedAnnotation, RecommendationEngine, RecommendationEngineFactory, TrainingCapability,
};
pub use error::{Error, Result};
pub use evaluation::{f1, ConfusionMatrix, EvaluationResult};
pub use events::{EventActor, EventBus, EventContext, EventEnvelope, ServerEvent};
pub use learning::{hide_rejected_or_skipped, ChangeLocation, LearningRecord, UserAction};
pub use models::*;
pub use predictions::{LogLevel, LogMessage, PredictionStore, Predictions};
pub use splitter::{
    DataSplit, DataSplitter, IncrementalSplitter, IncrementalStep, PercentageBasedSplitter,
    SplitSkipped,
};
pub use suggestion::*;
pub use traits::*;
