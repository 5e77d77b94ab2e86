//! Configuration-side data model: layers, features, documents, recommenders.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::evaluation::EvaluationResult;

// =============================================================================
// LAYERS & FEATURES
// =============================================================================

/// Kind of annotation a layer holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    /// Annotations anchored on a character offset range.
    Span,
    /// Annotations connecting two span annotations.
    Relation,
}

/// An annotation layer configured in a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationLayer {
    pub id: i64,
    pub project_id: i64,
    /// Type name used inside the CAS (e.g. `custom.NamedEntity`).
    pub name: String,
    pub ui_name: String,
    pub kind: LayerKind,
    pub enabled: bool,
    /// For relation layers: the span layer both endpoints live on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attach_layer: Option<String>,
}

impl AnnotationLayer {
    /// Create an enabled span layer.
    pub fn span(id: i64, project_id: i64, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id,
            project_id,
            ui_name: name.clone(),
            name,
            kind: LayerKind::Span,
            enabled: true,
            attach_layer: None,
        }
    }

    /// Create an enabled relation layer attached to `attach_layer`.
    pub fn relation(
        id: i64,
        project_id: i64,
        name: impl Into<String>,
        attach_layer: impl Into<String>,
    ) -> Self {
        let name = name.into();
        Self {
            id,
            project_id,
            ui_name: name.clone(),
            name,
            kind: LayerKind::Relation,
            enabled: true,
            attach_layer: Some(attach_layer.into()),
        }
    }
}

/// A feature (attribute) of an annotation layer that recommenders predict.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnnotationFeature {
    pub id: i64,
    pub layer_id: i64,
    pub name: String,
    pub ui_name: String,
}

impl AnnotationFeature {
    pub fn new(id: i64, layer_id: i64, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id,
            layer_id,
            ui_name: name.clone(),
            name,
        }
    }
}

// =============================================================================
// DOCUMENTS
// =============================================================================

/// A source document of a project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceDocument {
    pub id: i64,
    pub project_id: i64,
    pub name: String,
}

/// Per-user annotation progress on a document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationDocumentState {
    #[default]
    New,
    InProgress,
    Finished,
    Ignore,
}

// =============================================================================
// RECOMMENDERS
// =============================================================================

/// A configured instance of a suggestion-generating engine bound to one
/// layer/feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommender {
    pub id: i64,
    pub project_id: i64,
    pub name: String,
    pub layer: AnnotationLayer,
    pub feature: AnnotationFeature,
    /// Engine factory identifier.
    pub tool: String,
    pub enabled: bool,
    /// Activate without evaluation.
    pub always_selected: bool,
    /// Minimum F1 required for activation.
    pub threshold: f64,
    /// Documents in these states are not used for training.
    pub states_ignored_for_training: HashSet<AnnotationDocumentState>,
    /// Suggestions kept per position for this recommender.
    pub max_recommendations: usize,
}

impl Recommender {
    /// Create an enabled recommender with default threshold and limits.
    pub fn new(
        id: i64,
        name: impl Into<String>,
        layer: AnnotationLayer,
        feature: AnnotationFeature,
        tool: impl Into<String>,
    ) -> Self {
        Self {
            id,
            project_id: layer.project_id,
            name: name.into(),
            layer,
            feature,
            tool: tool.into(),
            enabled: true,
            always_selected: false,
            threshold: crate::defaults::RECOMMENDER_THRESHOLD,
            states_ignored_for_training: HashSet::new(),
            max_recommendations: crate::defaults::MAX_RECOMMENDATIONS,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_always_selected(mut self, always_selected: bool) -> Self {
        self.always_selected = always_selected;
        self
    }

    pub fn with_ignored_states(
        mut self,
        states: impl IntoIterator<Item = AnnotationDocumentState>,
    ) -> Self {
        self.states_ignored_for_training = states.into_iter().collect();
        self
    }

    pub fn with_max_recommendations(mut self, max: usize) -> Self {
        self.max_recommendations = max;
        self
    }
}

/// A recommender snapshot paired with the evaluation that justified its
/// activation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatedRecommender {
    pub recommender: Recommender,
    pub evaluation: EvaluationResult,
    pub active: bool,
}

impl EvaluatedRecommender {
    /// Evaluated and activated.
    pub fn activated(recommender: Recommender, evaluation: EvaluationResult) -> Self {
        Self {
            recommender,
            evaluation,
            active: true,
        }
    }

    /// Evaluated but below threshold (or evaluation skipped).
    pub fn rejected(recommender: Recommender, evaluation: EvaluationResult) -> Self {
        Self {
            recommender,
            evaluation,
            active: false,
        }
    }

    /// Activated without evaluation (always-selected or non-evaluable).
    pub fn without_evaluation(recommender: Recommender, reason: impl Into<String>) -> Self {
        Self {
            recommender,
            evaluation: EvaluationResult::skipped(reason),
            active: true,
        }
    }
}
