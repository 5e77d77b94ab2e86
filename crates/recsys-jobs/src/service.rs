//! The recommendation service: shared state of the pipeline and the
//! suggestion computation routine used by the prediction stage.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use recsys_core::{
    hide_rejected_or_skipped, AnnotationLayer, AnnotationSchemaService, AnnotationSuggestion, Cas,
    DocumentService, Error, EventBus, HideFlags, LearningRecordRepository, Position,
    PredictedAnnotation, PredictionStore, Predictions, RecommendationEngine,
    RecommendationEngineFactory, Recommender, RecommenderContext, RecommenderRepository, Result,
    SourceDocument,
};

use crate::config::PipelineConfig;
use crate::guard::{guarded, guarded_blocking};
use crate::queue::{CancellationFlag, EnqueueOutcome, TaskQueue};
use crate::registry::EngineRegistry;
use crate::task::Task;

/// Source name used for pipeline-level entries in the predictions log.
const PIPELINE_LOG_SOURCE: &str = "pipeline";

/// Everything the pipeline stages need. Clones share state.
#[derive(Clone)]
pub struct RecommendationService {
    documents: Arc<dyn DocumentService>,
    schema: Arc<dyn AnnotationSchemaService>,
    recommenders: Arc<dyn RecommenderRepository>,
    learning_records: Arc<dyn LearningRecordRepository>,
    registry: Arc<EngineRegistry>,
    predictions: Arc<PredictionStore>,
    events: Arc<EventBus>,
    queue: Arc<TaskQueue>,
    config: PipelineConfig,
}

/// An engine ready to predict, paired with its published context.
struct PredictionEngine {
    engine: Arc<dyn RecommendationEngine>,
    context: Arc<RecommenderContext>,
}

impl RecommendationService {
    pub fn new(
        documents: Arc<dyn DocumentService>,
        schema: Arc<dyn AnnotationSchemaService>,
        recommenders: Arc<dyn RecommenderRepository>,
        learning_records: Arc<dyn LearningRecordRepository>,
        registry: EngineRegistry,
    ) -> Self {
        Self {
            documents,
            schema,
            recommenders,
            learning_records,
            registry: Arc::new(registry),
            predictions: Arc::new(PredictionStore::new()),
            events: Arc::new(EventBus::default()),
            queue: Arc::new(TaskQueue::new()),
            config: PipelineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn with_queue(mut self, queue: Arc<TaskQueue>) -> Self {
        self.queue = queue;
        self
    }

    pub fn with_prediction_store(mut self, predictions: Arc<PredictionStore>) -> Self {
        self.predictions = predictions;
        self
    }

    pub fn documents(&self) -> &Arc<dyn DocumentService> {
        &self.documents
    }

    pub fn schema(&self) -> &Arc<dyn AnnotationSchemaService> {
        &self.schema
    }

    pub fn recommenders(&self) -> &Arc<dyn RecommenderRepository> {
        &self.recommenders
    }

    pub fn learning_records(&self) -> &Arc<dyn LearningRecordRepository> {
        &self.learning_records
    }

    pub fn registry(&self) -> &EngineRegistry {
        &self.registry
    }

    pub fn predictions(&self) -> &Arc<PredictionStore> {
        &self.predictions
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    // -------------------------------------------------------------------------
    // Scheduling
    // -------------------------------------------------------------------------

    pub async fn enqueue(&self, task: Task) -> Result<EnqueueOutcome> {
        self.queue.enqueue(task).await
    }

    /// Start the pipeline for (user, project) with a selection task.
    pub async fn trigger_selection(
        &self,
        user: &str,
        project_id: i64,
        trigger: &str,
    ) -> Result<EnqueueOutcome> {
        self.enqueue(Task::selection(user, project_id, trigger)).await
    }

    /// Drop queued tasks of a project and stop its running ones.
    pub async fn cancel_project_tasks(&self, project_id: i64) -> usize {
        self.queue.cancel_project(project_id).await
    }

    pub async fn cancel_user_tasks(&self, user: &str, project_id: i64) -> usize {
        self.queue.cancel_user_project(user, project_id).await
    }

    /// Cancel the user's tasks and forget their predictions.
    pub async fn reset_state(&self, user: &str, project_id: i64) {
        self.cancel_user_tasks(user, project_id).await;
        self.predictions.clear(user, project_id).await;
        info!(user, project_id, "Recommendation state reset");
    }

    // -------------------------------------------------------------------------
    // Configuration lookup
    // -------------------------------------------------------------------------

    pub async fn enabled_layers(&self, project_id: i64) -> Result<Vec<AnnotationLayer>> {
        Ok(self
            .schema
            .list_layers(project_id)
            .await?
            .into_iter()
            .filter(|layer| layer.enabled)
            .collect())
    }

    /// Fresh configuration of a recommender plus its engine factory.
    ///
    /// `None` when the recommender was deleted, disabled, or its factory is
    /// missing or rejects the layer/feature pairing. Configuration can change
    /// while a task runs, so these are logged and skipped rather than failing.
    pub async fn resolve_recommender(
        &self,
        recommender_id: i64,
    ) -> Result<Option<(Recommender, Arc<dyn RecommendationEngineFactory>)>> {
        let recommender = match self.recommenders.get_recommender(recommender_id).await {
            Ok(recommender) => recommender,
            Err(Error::RecommenderNotFound(_)) => {
                info!(recommender_id, "Recommender no longer exists, skipping");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if !recommender.enabled {
            debug!(recommender_id, recommender = %recommender.name, "Recommender disabled, skipping");
            return Ok(None);
        }

        let Some(factory) = self.registry.get(&recommender.tool) else {
            info!(recommender_id, recommender = %recommender.name, tool = %recommender.tool,
                "No engine factory for tool, skipping");
            return Ok(None);
        };

        if !factory.accepts(&recommender.layer, &recommender.feature) {
            info!(recommender_id, recommender = %recommender.name, tool = %recommender.tool,
                layer_id = recommender.layer.id, "Engine no longer accepts layer/feature, skipping");
            return Ok(None);
        }

        Ok(Some((recommender, factory)))
    }

    /// The user's annotation CASes of every project document. Documents that
    /// cannot be read are left out.
    pub async fn read_annotation_cases(&self, user: &str, project_id: i64) -> Result<Vec<Cas>> {
        let documents = self.documents.list_source_documents(project_id).await?;
        let mut cases = Vec::with_capacity(documents.len());
        for document in &documents {
            match self.documents.read_cas(document, user).await {
                Ok(cas) => cases.push(cas),
                Err(e) => {
                    warn!(user, project_id, document = %document.name, error = %e,
                        "Cannot read annotation document, excluding it");
                }
            }
        }
        debug!(user, project_id, document_count = cases.len(), "Loaded annotation documents");
        Ok(cases)
    }

    // -------------------------------------------------------------------------
    // Suggestion computation
    // -------------------------------------------------------------------------

    /// Predict suggestions for `documents` and merge them with the latest
    /// predictions of (user, project).
    ///
    /// Engine and CAS failures are recorded and skipped; only repository
    /// failures and cancellation abort the run.
    pub async fn compute_predictions(
        &self,
        user: &str,
        project_id: i64,
        documents: &[SourceDocument],
        cancel: &CancellationFlag,
    ) -> Result<Predictions> {
        let start = Instant::now();
        let previous = self.predictions.latest(user, project_id).await;
        let mut predictions = match &previous {
            Some(previous) => Predictions::from_predecessor(previous),
            None => Predictions::new(user, project_id),
        };

        let engines = self
            .prediction_engines(user, project_id, &mut predictions)
            .await?;
        if engines.is_empty() {
            info!(user, project_id, "No recommenders ready for prediction");
            predictions.log_info(PIPELINE_LOG_SOURCE, "No recommenders ready for prediction");
            return Ok(predictions);
        }

        let records = self
            .learning_records
            .list_records(user, project_id, None)
            .await?;

        for document in documents {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let cas = match self.documents.read_cas(document, user).await {
                Ok(cas) => Arc::new(cas),
                Err(e) => {
                    warn!(user, project_id, document = %document.name, error = %e,
                        "Cannot read annotation document, skipping prediction");
                    predictions.log_warn(
                        PIPELINE_LOG_SOURCE,
                        format!("Skipped document '{}': {}", document.name, e),
                    );
                    continue;
                }
            };

            for entry in &engines {
                let recommender = entry.engine.recommender();
                let (engine, context, input) =
                    (entry.engine.clone(), entry.context.clone(), cas.clone());
                let predicted = match guarded_blocking(move || engine.predict(&context, &input))
                    .await
                {
                    Ok(predicted) => predicted,
                    Err(e) => {
                        error!(user, recommender_id = recommender.id, recommender = %recommender.name,
                            document = %document.name, error = %e, "Prediction failed");
                        predictions.log_error(
                            recommender.name.clone(),
                            format!("Prediction failed on '{}': {}", document.name, e),
                        );
                        continue;
                    }
                };

                let mut suggestions =
                    to_suggestions(recommender, &document.name, predicted);
                hide_existing(&cas, recommender, &mut suggestions);
                hide_rejected_or_skipped(&records, suggestions.iter_mut(), true);
                tracing::trace!(recommender_id = recommender.id, document = %document.name,
                    suggestion_count = suggestions.len(), "Predicted suggestions");
                predictions.put_suggestions(suggestions);
            }
            predictions.mark_document_as_predicted(document.name.clone());
        }

        if let Some(previous) = &previous {
            predictions.inherit_suggestions(previous);
            let carried = predictions.inherit_documents(previous);
            debug!(user, project_id, carried, "Carried over unpredicted documents");
        }

        info!(
            user,
            project_id,
            generation = predictions.generation(),
            suggestion_count = predictions.len(),
            added = predictions.added_count(),
            aged = predictions.aged_count(),
            removed = predictions.removed_count(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Predictions computed"
        );
        Ok(predictions)
    }

    /// Active recommenders with a ready context and a buildable engine.
    async fn prediction_engines(
        &self,
        user: &str,
        project_id: i64,
        predictions: &mut Predictions,
    ) -> Result<Vec<PredictionEngine>> {
        let mut engines = Vec::new();
        for layer in self.enabled_layers(project_id).await? {
            let active = self
                .recommenders
                .get_active_recommenders(user, layer.id)
                .await?;
            for evaluated in active.into_iter().filter(|e| e.active) {
                let Some((recommender, factory)) =
                    self.resolve_recommender(evaluated.recommender.id).await?
                else {
                    continue;
                };

                let Some(context) = self.recommenders.get_context(user, recommender.id).await?
                else {
                    debug!(user, recommender_id = recommender.id, "No trained context yet");
                    continue;
                };

                let engine = match guarded(|| factory.build(&recommender)) {
                    Ok(engine) => engine,
                    Err(e) => {
                        error!(user, recommender_id = recommender.id, recommender = %recommender.name,
                            error = %e, "Cannot build engine");
                        predictions.log_error(
                            recommender.name.clone(),
                            format!("Cannot build engine: {}", e),
                        );
                        continue;
                    }
                };

                if !engine.is_ready_for_prediction(&context) {
                    debug!(user, recommender_id = recommender.id, "Context not ready for prediction");
                    continue;
                }
                engines.push(PredictionEngine {
                    engine: Arc::from(engine),
                    context,
                });
            }
        }
        Ok(engines)
    }
}

/// Convert predictions into suggestions, keeping at most
/// `max_recommendations` per position (highest scores first).
fn to_suggestions(
    recommender: &Recommender,
    document_name: &str,
    mut predicted: Vec<PredictedAnnotation>,
) -> Vec<AnnotationSuggestion> {
    predicted.sort_by(|a, b| b.score.total_cmp(&a.score));
    let limit = recommender.max_recommendations.max(1);
    let mut per_position: HashMap<Position, usize> = HashMap::new();
    predicted
        .into_iter()
        .filter(|p| {
            let seen = per_position.entry(p.position).or_default();
            *seen += 1;
            *seen <= limit
        })
        .map(|p| p.into_suggestion(recommender, document_name))
        .collect()
}

/// Hide suggestions the document already carries as annotations.
fn hide_existing(cas: &Cas, recommender: &Recommender, suggestions: &mut [AnnotationSuggestion]) {
    for s in suggestions.iter_mut() {
        if cas.contains_annotation(
            &recommender.layer.name,
            &s.position,
            &recommender.feature.name,
            s.label(),
        ) {
            s.hide(HideFlags::OVERLAP);
        }
    }
}

impl std::fmt::Debug for RecommendationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecommendationService")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
