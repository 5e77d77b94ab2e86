//! Recommendation engine contract.
//!
//! Engines are black boxes: the pipeline only trains them, asks them for
//! predictions and evaluates them. Every call is synchronous and runs on the
//! worker executing the current task.

use serde::{Deserialize, Serialize};

use crate::cas::Cas;
use crate::context::RecommenderContext;
use crate::error::Result;
use crate::evaluation::EvaluationResult;
use crate::models::{AnnotationFeature, AnnotationLayer, Recommender};
use crate::splitter::DataSplitter;
use crate::suggestion::{AnnotationSuggestion, AutoAcceptMode, Position};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrainingCapability {
    /// Predicts without a trained model (rule-based, external service).
    TrainingNotSupported,
    /// Can train, but also predicts from an untrained context.
    TrainingSupported,
    /// Must be trained on at least one document before predicting.
    TrainingRequired,
}

/// One annotation an engine proposes for a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictedAnnotation {
    pub position: Position,
    pub label: Option<String>,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default)]
    pub auto_accept: AutoAcceptMode,
}

impl PredictedAnnotation {
    pub fn new(position: Position, label: Option<String>, score: f64) -> Self {
        Self {
            position,
            label,
            score,
            explanation: None,
            auto_accept: AutoAcceptMode::Never,
        }
    }

    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = Some(explanation.into());
        self
    }

    pub fn with_auto_accept(mut self, mode: AutoAcceptMode) -> Self {
        self.auto_accept = mode;
        self
    }

    /// Suggestion for `document_name`, attributed to `recommender`. The id is
    /// left unassigned.
    pub fn into_suggestion(
        self,
        recommender: &Recommender,
        document_name: &str,
    ) -> AnnotationSuggestion {
        AnnotationSuggestion::new(
            recommender.id,
            recommender.name.clone(),
            recommender.layer.id,
            recommender.feature.name.clone(),
            document_name,
            self.position,
            self.label,
            self.score,
        )
        .with_score_explanation(self.explanation)
        .with_auto_accept(self.auto_accept)
    }
}

pub trait RecommendationEngine: Send + Sync {
    fn recommender(&self) -> &Recommender;

    fn training_capability(&self) -> TrainingCapability {
        TrainingCapability::TrainingSupported
    }

    /// Update `context` from the annotated `documents`.
    fn train(&self, context: &mut RecommenderContext, documents: &[Cas]) -> Result<()>;

    fn predict(&self, context: &RecommenderContext, cas: &Cas) -> Result<Vec<PredictedAnnotation>>;

    /// Evaluate on `documents` partitioned by `splitter`. A pool too small to
    /// split yields a skipped result, not an error.
    fn evaluate(&self, documents: &[Cas], splitter: &DataSplitter) -> Result<EvaluationResult>;

    /// Number of training instances the engine would extract from `documents`.
    fn estimate_sample_count(&self, documents: &[Cas]) -> usize;

    fn is_ready_for_prediction(&self, context: &RecommenderContext) -> bool {
        context.is_ready_for_prediction()
    }
}

/// Builds engines for one tool id.
pub trait RecommendationEngineFactory: Send + Sync {
    /// Tool id recommenders refer to.
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn accepts(&self, layer: &AnnotationLayer, feature: &AnnotationFeature) -> bool;

    /// Engines that cannot be evaluated are activated without evaluation.
    fn is_evaluable(&self) -> bool {
        true
    }

    fn build(&self, recommender: &Recommender) -> Result<Box<dyn RecommendationEngine>>;
}
