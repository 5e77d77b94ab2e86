//! Active-learning service: presents suggestions one at a time and records
//! the annotator's decisions.
//!
//! ## Decision flow
//!
//! Every action on a suggestion:
//! 1. For accept and correct, materializes the label into the user's CAS and
//!    writes the CAS back
//! 2. Appends learning records (a correction also rejects the original label)
//! 3. Hides the suggestion in the active predictions with a transient flag
//! 4. Publishes a `SuggestionAction` event
//!
//! The CAS is written before any record so a failed write leaves no trace.
//! Transient flags only live until the next prediction run; from then on the
//! learning records decide visibility.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use recsys_core::{
    hide_rejected_or_skipped, AnnotationLayer, AnnotationSchemaService, AnnotationSuggestion,
    AutoAcceptMode, Cas, ChangeLocation, Delta, DocumentService, Error, EventActor, EventBus,
    EventContext, HideFlags, LearningRecord, LearningRecordRepository, Preferences,
    PredictionStore, Result, ServerEvent, SuggestionGroup, UserAction,
};

use crate::dedup::remove_duplicate_recommendations;
use crate::strategy::{ActiveLearningStrategy, UncertaintySamplingStrategy};

/// Shares the prediction store and event bus with the pipeline.
#[derive(Clone)]
pub struct ActiveLearningService {
    documents: Arc<dyn DocumentService>,
    schema: Arc<dyn AnnotationSchemaService>,
    learning_records: Arc<dyn LearningRecordRepository>,
    predictions: Arc<PredictionStore>,
    events: Arc<EventBus>,
    strategy: Arc<dyn ActiveLearningStrategy>,
}

impl ActiveLearningService {
    pub fn new(
        documents: Arc<dyn DocumentService>,
        schema: Arc<dyn AnnotationSchemaService>,
        learning_records: Arc<dyn LearningRecordRepository>,
        predictions: Arc<PredictionStore>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            documents,
            schema,
            learning_records,
            predictions,
            events,
            strategy: Arc::new(UncertaintySamplingStrategy::new()),
        }
    }

    pub fn with_strategy(mut self, strategy: impl ActiveLearningStrategy + 'static) -> Self {
        self.strategy = Arc::new(strategy);
        self
    }

    pub fn strategy(&self) -> &dyn ActiveLearningStrategy {
        self.strategy.as_ref()
    }

    /// Promote pending incoming predictions to active.
    ///
    /// Returns false when nothing was pending.
    pub async fn refresh(&self, user: &str, project_id: i64) -> bool {
        if !self.predictions.switch(user, project_id).await {
            return false;
        }
        let generation = self
            .predictions
            .with_active(user, project_id, |p| p.generation())
            .await
            .unwrap_or_default();
        info!(user, project_id, generation, "Switched to new predictions");
        self.events.emit(ServerEvent::PredictionsSwitched {
            user: user.to_string(),
            project_id,
            generation,
        });
        true
    }

    /// Active suggestion groups on `layer`, across all documents.
    pub async fn get_suggestions(&self, user: &str, layer: &AnnotationLayer) -> Vec<SuggestionGroup> {
        self.predictions
            .with_active(user, layer.project_id, |p| p.suggestions_for_layer(layer.id))
            .await
            .unwrap_or_default()
    }

    /// Hide visible suggestions in `groups` the user rejected (or, with
    /// `filter_skipped`, skipped) before. Returns the number newly hidden.
    pub async fn hide_rejected_or_skipped(
        &self,
        user: &str,
        layer: &AnnotationLayer,
        groups: &mut [SuggestionGroup],
        filter_skipped: bool,
    ) -> Result<usize> {
        let records = self
            .learning_records
            .list_records(user, layer.project_id, Some(layer.id))
            .await?;
        let hidden = hide_rejected_or_skipped(
            &records,
            groups.iter_mut().flat_map(|g| g.iter_mut()),
            filter_skipped,
        );
        debug!(user, layer_id = layer.id, hidden, "Applied learning history");
        Ok(hidden)
    }

    /// Next suggestion to present on `layer`, chosen by the strategy.
    #[instrument(skip(self, layer, preferences), fields(layer_id = layer.id))]
    pub async fn generate_next_suggestion(
        &self,
        user: &str,
        layer: &AnnotationLayer,
        preferences: &Preferences,
    ) -> Result<Option<Delta>> {
        let groups = self.get_suggestions(user, layer).await;
        let mut groups = remove_duplicate_recommendations(groups);
        self.hide_rejected_or_skipped(user, layer, &mut groups, true)
            .await?;

        let next = self.strategy.next_suggestion(&groups, preferences);
        match &next {
            Some(delta) => debug!(user, strategy = self.strategy.name(),
                suggestion_id = delta.first.id, document = %delta.first.document_name,
                delta = delta.delta, "Next suggestion selected"),
            None => debug!(user, strategy = self.strategy.name(), "No suggestion left"),
        }
        Ok(next)
    }

    // -------------------------------------------------------------------------
    // Decisions
    // -------------------------------------------------------------------------

    /// Turn the suggestion into an annotation. Returns the annotation id.
    pub async fn accept(
        &self,
        user: &str,
        project_id: i64,
        document_name: &str,
        suggestion_id: i32,
        location: ChangeLocation,
    ) -> Result<i32> {
        let suggestion = self
            .find_suggestion(user, project_id, document_name, suggestion_id)
            .await?;
        let ids = self
            .accept_many(user, project_id, document_name, vec![suggestion], location)
            .await?;
        ids.into_iter()
            .next()
            .ok_or_else(|| Error::Internal("Accept produced no annotation".into()))
    }

    pub async fn reject(
        &self,
        user: &str,
        project_id: i64,
        document_name: &str,
        suggestion_id: i32,
        location: ChangeLocation,
    ) -> Result<()> {
        let suggestion = self
            .find_suggestion(user, project_id, document_name, suggestion_id)
            .await?;
        self.record(user, project_id, &suggestion, UserAction::Rejected, location, None)
            .await?;
        let label = suggestion.label.clone();
        self.conclude(user, project_id, &suggestion, UserAction::Rejected, location, label)
            .await;
        Ok(())
    }

    pub async fn skip(
        &self,
        user: &str,
        project_id: i64,
        document_name: &str,
        suggestion_id: i32,
        location: ChangeLocation,
    ) -> Result<()> {
        let suggestion = self
            .find_suggestion(user, project_id, document_name, suggestion_id)
            .await?;
        self.record(user, project_id, &suggestion, UserAction::Skipped, location, None)
            .await?;
        let label = suggestion.label.clone();
        self.conclude(user, project_id, &suggestion, UserAction::Skipped, location, label)
            .await;
        Ok(())
    }

    /// Annotate the suggestion's position with `label` instead of the
    /// suggested one. The suggested label is recorded as rejected so it does
    /// not come back.
    pub async fn correct(
        &self,
        user: &str,
        project_id: i64,
        document_name: &str,
        suggestion_id: i32,
        label: &str,
        location: ChangeLocation,
    ) -> Result<i32> {
        let suggestion = self
            .find_suggestion(user, project_id, document_name, suggestion_id)
            .await?;
        let label = Some(label.to_string());

        let document = self
            .documents
            .get_source_document(project_id, document_name)
            .await?;
        let mut cas = self.documents.read_cas(&document, user).await?;
        let annotation_id = self
            .materialize(&mut cas, &suggestion, label.as_deref())
            .await?;
        self.documents.write_cas(&document, user, &cas).await?;

        self.record(user, project_id, &suggestion, UserAction::Rejected, location, None)
            .await?;
        self.record(
            user,
            project_id,
            &suggestion,
            UserAction::Corrected,
            location,
            label.clone(),
        )
        .await?;
        self.conclude(user, project_id, &suggestion, UserAction::Corrected, location, label)
            .await;
        Ok(annotation_id)
    }

    /// Accept every visible suggestion of the document marked for
    /// acceptance on first access. Returns the number accepted.
    pub async fn auto_accept_on_first_access(
        &self,
        user: &str,
        project_id: i64,
        document_name: &str,
    ) -> Result<usize> {
        let candidates: Vec<AnnotationSuggestion> = self
            .predictions
            .with_active(user, project_id, |p| {
                p.get_predictions_by_document(document_name)
                    .iter()
                    .filter(|s| s.is_visible() && s.auto_accept == AutoAcceptMode::OnFirstAccess)
                    .cloned()
                    .collect()
            })
            .await
            .unwrap_or_default();
        if candidates.is_empty() {
            return Ok(0);
        }

        let accepted = self
            .accept_many(
                user,
                project_id,
                document_name,
                candidates,
                ChangeLocation::AutoAccept,
            )
            .await?
            .len();
        info!(user, project_id, document = document_name, accepted, "Auto-accepted suggestions");
        Ok(accepted)
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    async fn find_suggestion(
        &self,
        user: &str,
        project_id: i64,
        document_name: &str,
        suggestion_id: i32,
    ) -> Result<AnnotationSuggestion> {
        self.predictions
            .with_active(user, project_id, |p| p.get(document_name, suggestion_id).cloned())
            .await
            .flatten()
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "Suggestion {} in document '{}'",
                    suggestion_id, document_name
                ))
            })
    }

    /// Materialize `suggestions` with one CAS read and write, then record
    /// and conclude each. Returns the annotation ids in input order.
    async fn accept_many(
        &self,
        user: &str,
        project_id: i64,
        document_name: &str,
        suggestions: Vec<AnnotationSuggestion>,
        location: ChangeLocation,
    ) -> Result<Vec<i32>> {
        let document = self
            .documents
            .get_source_document(project_id, document_name)
            .await?;
        let mut cas = self.documents.read_cas(&document, user).await?;
        let mut annotation_ids = Vec::with_capacity(suggestions.len());
        for suggestion in &suggestions {
            let id = self
                .materialize(&mut cas, suggestion, suggestion.label())
                .await?;
            annotation_ids.push(id);
        }
        self.documents.write_cas(&document, user, &cas).await?;

        for suggestion in &suggestions {
            self.record(user, project_id, suggestion, UserAction::Accepted, location, None)
                .await?;
            self.conclude(
                user,
                project_id,
                suggestion,
                UserAction::Accepted,
                location,
                suggestion.label.clone(),
            )
            .await;
        }
        Ok(annotation_ids)
    }

    async fn materialize(
        &self,
        cas: &mut Cas,
        suggestion: &AnnotationSuggestion,
        label: Option<&str>,
    ) -> Result<i32> {
        let layer = self.schema.get_layer(suggestion.layer_id).await?;
        self.schema
            .materialize(cas, &layer, &suggestion.feature, suggestion, label)
            .await
    }

    /// Append a learning record; `label` overrides the suggested label.
    async fn record(
        &self,
        user: &str,
        project_id: i64,
        suggestion: &AnnotationSuggestion,
        action: UserAction,
        location: ChangeLocation,
        label: Option<String>,
    ) -> Result<()> {
        let mut record =
            LearningRecord::from_suggestion(user, project_id, suggestion, action, location);
        if label.is_some() {
            record = record.with_label(label);
        }
        self.learning_records.log_record(record).await?;
        Ok(())
    }

    /// Hide the suggestion for the rest of this generation and publish the
    /// decision.
    async fn conclude(
        &self,
        user: &str,
        project_id: i64,
        suggestion: &AnnotationSuggestion,
        action: UserAction,
        location: ChangeLocation,
        label: Option<String>,
    ) {
        let flag = match action {
            UserAction::Accepted => HideFlags::TRANSIENT_ACCEPTED,
            UserAction::Rejected => HideFlags::TRANSIENT_REJECTED,
            UserAction::Corrected => HideFlags::TRANSIENT_CORRECTED,
            UserAction::Skipped => HideFlags::SKIPPED,
            UserAction::Shown => HideFlags::NONE,
        };
        if !flag.is_empty() {
            self.predictions
                .with_active(user, project_id, |p| {
                    if let Some(s) = p.get_mut(&suggestion.document_name, suggestion.id) {
                        s.hide(flag);
                    }
                })
                .await;
        }

        info!(user, project_id, document = %suggestion.document_name,
            recommender_id = suggestion.recommender_id, suggestion_id = suggestion.id,
            ?action, ?location, "Suggestion decision recorded");
        self.events.emit_with_context(
            ServerEvent::SuggestionAction {
                user: user.to_string(),
                project_id,
                document_name: suggestion.document_name.clone(),
                recommender_id: suggestion.recommender_id,
                suggestion_id: suggestion.id,
                label,
                action,
                location,
            },
            EventContext {
                actor: Some(EventActor::user(user)),
                correlation_id: None,
            },
        );
    }
}

impl std::fmt::Debug for ActiveLearningService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveLearningService")
            .field("strategy", &self.strategy.name())
            .finish_non_exhaustive()
    }
}
