//! Collaborator traits the pipeline consumes.
//!
//! Document storage, the annotation schema, recommender configuration and the
//! learning record live outside this workspace. The pipeline only talks to
//! them through these traits, so backends are pluggable and tests can use the
//! in-memory implementations from `recsys-store`.

use std::sync::Arc;

use async_trait::async_trait;

use crate::cas::Cas;
use crate::context::RecommenderContext;
use crate::error::Result;
use crate::learning::LearningRecord;
use crate::models::*;
use crate::suggestion::AnnotationSuggestion;

// =============================================================================
// DOCUMENTS
// =============================================================================

#[async_trait]
pub trait DocumentService: Send + Sync {
    /// All source documents of a project, ordered by name.
    async fn list_source_documents(&self, project_id: i64) -> Result<Vec<SourceDocument>>;

    /// Look up a source document by name.
    async fn get_source_document(&self, project_id: i64, name: &str) -> Result<SourceDocument>;

    /// Read the user's annotation CAS for a document.
    ///
    /// A document the user never opened yields a CAS with the document text
    /// and no annotations.
    async fn read_cas(&self, document: &SourceDocument, user: &str) -> Result<Cas>;

    /// Persist the user's annotation CAS for a document.
    async fn write_cas(&self, document: &SourceDocument, user: &str, cas: &Cas) -> Result<()>;

    /// Source documents with the user's annotation-document state.
    async fn list_documents_with_state(
        &self,
        project_id: i64,
        user: &str,
    ) -> Result<Vec<(SourceDocument, AnnotationDocumentState)>>;
}

// =============================================================================
// SCHEMA
// =============================================================================

#[async_trait]
pub trait AnnotationSchemaService: Send + Sync {
    async fn list_layers(&self, project_id: i64) -> Result<Vec<AnnotationLayer>>;

    async fn get_layer(&self, layer_id: i64) -> Result<AnnotationLayer>;

    /// Turn a suggestion into an annotation in `cas`, setting `feature` to
    /// `label`. Returns the id of the created (or updated) annotation.
    async fn materialize(
        &self,
        cas: &mut Cas,
        layer: &AnnotationLayer,
        feature: &str,
        suggestion: &AnnotationSuggestion,
        label: Option<&str>,
    ) -> Result<i32>;
}

// =============================================================================
// RECOMMENDERS
// =============================================================================

#[async_trait]
pub trait RecommenderRepository: Send + Sync {
    /// Recommenders configured on a layer.
    async fn list_recommenders(&self, layer_id: i64) -> Result<Vec<Recommender>>;

    /// Fresh configuration of one recommender.
    ///
    /// Returns `Error::RecommenderNotFound` if it was deleted.
    async fn get_recommender(&self, recommender_id: i64) -> Result<Recommender>;

    /// Last published context, if the recommender was ever trained for `user`.
    async fn get_context(
        &self,
        user: &str,
        recommender_id: i64,
    ) -> Result<Option<Arc<RecommenderContext>>>;

    /// Replace the published context. The context must be closed.
    async fn put_context(
        &self,
        user: &str,
        recommender_id: i64,
        context: Arc<RecommenderContext>,
    ) -> Result<()>;

    async fn get_active_recommenders(
        &self,
        user: &str,
        layer_id: i64,
    ) -> Result<Vec<EvaluatedRecommender>>;

    async fn set_active_recommenders(
        &self,
        user: &str,
        layer_id: i64,
        recommenders: Vec<EvaluatedRecommender>,
    ) -> Result<()>;

    /// Whether any layer of the project has an active recommender for `user`.
    async fn has_active_recommenders(&self, user: &str, project_id: i64) -> Result<bool>;
}

// =============================================================================
// LEARNING RECORD
// =============================================================================

#[async_trait]
pub trait LearningRecordRepository: Send + Sync {
    /// Append a record. Returns it with its assigned id.
    async fn log_record(&self, record: LearningRecord) -> Result<LearningRecord>;

    /// Records of `user` in a project, oldest first, optionally for one layer.
    async fn list_records(
        &self,
        user: &str,
        project_id: i64,
        layer_id: Option<i64>,
    ) -> Result<Vec<LearningRecord>>;
}
