//! Training stage: update the context of every active recommender.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use tokio::sync::OnceCell;
use tracing::{debug, error, info, instrument, warn};

use recsys_core::{
    AnnotationDocumentState, Cas, Recommender, RecommenderContext, Result, SourceDocument,
    TrainingCapability,
};

use crate::guard::{guarded, guarded_blocking};
use crate::handler::{TaskContext, TaskHandler, TaskResult};
use crate::service::RecommendationService;
use crate::task::{Task, TaskKind};

type TrainingDocument = (SourceDocument, AnnotationDocumentState, Cas);

pub struct TrainingHandler {
    service: RecommendationService,
}

impl TrainingHandler {
    pub fn new(service: RecommendationService) -> Self {
        Self { service }
    }

    async fn train(&self, ctx: &TaskContext) -> Result<JsonValue> {
        let user = ctx.user();
        let project_id = ctx.project_id();
        let documents: OnceCell<Vec<TrainingDocument>> = OnceCell::new();

        let mut trained = 0;
        let mut skipped = 0;
        let mut failed = 0;

        for layer in self.service.enabled_layers(project_id).await? {
            let active = self
                .service
                .recommenders()
                .get_active_recommenders(user, layer.id)
                .await?;

            for evaluated in active.into_iter().filter(|e| e.active) {
                ctx.check_cancelled()?;

                let Some((recommender, factory)) =
                    self.service.resolve_recommender(evaluated.recommender.id).await?
                else {
                    skipped += 1;
                    continue;
                };

                let engine = match guarded(|| factory.build(&recommender)) {
                    Ok(engine) => engine,
                    Err(e) => {
                        error!(user, recommender_id = recommender.id, recommender = %recommender.name,
                            error = %e, "Cannot build engine");
                        failed += 1;
                        continue;
                    }
                };

                // Copy-on-train: predictions keep reading the published context.
                let mut context = match self
                    .service
                    .recommenders()
                    .get_context(user, recommender.id)
                    .await?
                {
                    Some(previous) => previous.copy(),
                    None => RecommenderContext::empty(),
                };

                let capability = engine.training_capability();
                if capability != TrainingCapability::TrainingNotSupported {
                    let all = documents
                        .get_or_try_init(|| self.load_documents(user, project_id))
                        .await?;
                    let training = training_set(&recommender, all);

                    if training.is_empty() && capability == TrainingCapability::TrainingRequired {
                        info!(user, recommender_id = recommender.id, recommender = %recommender.name,
                            "No training data for recommender that requires training, skipping");
                        skipped += 1;
                        continue;
                    }

                    let document_count = training.len();
                    context = match guarded_blocking(move || {
                        engine.train(&mut context, &training)?;
                        Ok(context)
                    })
                    .await
                    {
                        Ok(context) => context,
                        Err(e) => {
                            error!(user, recommender_id = recommender.id, recommender = %recommender.name,
                                error = %e, "Training failed");
                            failed += 1;
                            continue;
                        }
                    };
                    debug!(user, recommender_id = recommender.id, document_count,
                        "Recommender trained");
                }

                context.mark_ready()?;
                context.close();
                self.service
                    .recommenders()
                    .put_context(user, recommender.id, Arc::new(context))
                    .await?;
                trained += 1;
            }
        }

        ctx.report_progress(100, Some("Training done"));
        self.service
            .enqueue(Task::prediction(user, project_id, "Training completed"))
            .await?;

        info!(user, project_id, trained, skipped, failed, "Training completed");
        Ok(json!({
            "trained": trained,
            "skipped": skipped,
            "failed": failed,
        }))
    }

    /// Every document with the user's state and CAS. Unreadable documents
    /// are left out.
    async fn load_documents(&self, user: &str, project_id: i64) -> Result<Vec<TrainingDocument>> {
        let listed = self
            .service
            .documents()
            .list_documents_with_state(project_id, user)
            .await?;
        let mut loaded = Vec::with_capacity(listed.len());
        for (document, state) in listed {
            match self.service.documents().read_cas(&document, user).await {
                Ok(cas) => loaded.push((document, state, cas)),
                Err(e) => {
                    warn!(user, project_id, document = %document.name, error = %e,
                        "Cannot read annotation document, excluding it from training");
                }
            }
        }
        debug!(user, project_id, document_count = loaded.len(), "Loaded training documents");
        Ok(loaded)
    }
}

/// Documents not in an ignored state that carry annotations on the
/// recommender's layer.
fn training_set(recommender: &Recommender, documents: &[TrainingDocument]) -> Vec<Cas> {
    documents
        .iter()
        .filter(|(_, state, _)| !recommender.states_ignored_for_training.contains(state))
        .filter(|(_, _, cas)| cas.has_annotations_on(&recommender.layer.name))
        .map(|(_, _, cas)| cas.clone())
        .collect()
}

#[async_trait]
impl TaskHandler for TrainingHandler {
    fn task_kind(&self) -> TaskKind {
        TaskKind::Training
    }

    #[instrument(skip(self, ctx), fields(task_id = %ctx.task.id, user = %ctx.task.user,
        project_id = ctx.task.project_id))]
    async fn execute(&self, ctx: TaskContext) -> TaskResult {
        self.train(&ctx).await.into()
    }
}
