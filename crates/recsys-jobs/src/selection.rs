//! Selection stage: evaluate recommenders and decide which become active.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use tokio::sync::OnceCell;
use tracing::{debug, error, info, instrument};

use recsys_core::{
    Cas, Error, EvaluatedRecommender, EvaluationResult, RecommendationEngineFactory, Recommender,
    Result, ServerEvent,
};

use crate::guard::guarded_blocking;
use crate::handler::{TaskContext, TaskHandler, TaskResult};
use crate::service::RecommendationService;
use crate::task::{Task, TaskKind};

pub struct SelectionHandler {
    service: RecommendationService,
}

impl SelectionHandler {
    pub fn new(service: RecommendationService) -> Self {
        Self { service }
    }

    async fn select(&self, ctx: &TaskContext) -> Result<JsonValue> {
        let user = ctx.user();
        let project_id = ctx.project_id();
        // Read at most once, and only if some recommender needs evaluating.
        let cases: OnceCell<Arc<Vec<Cas>>> = OnceCell::new();

        let mut evaluated_count = 0;
        let mut active_count = 0;

        let layers = self.service.enabled_layers(project_id).await?;
        for layer in &layers {
            let configured = self
                .service
                .recommenders()
                .list_recommenders(layer.id)
                .await?;
            if configured.is_empty() {
                continue;
            }

            let mut active = Vec::new();
            for candidate in configured {
                ctx.check_cancelled()?;

                let Some((recommender, factory)) =
                    self.service.resolve_recommender(candidate.id).await?
                else {
                    continue;
                };

                let start = Instant::now();
                let evaluated = if recommender.always_selected {
                    EvaluatedRecommender::without_evaluation(recommender, "Always selected")
                } else if !factory.is_evaluable() {
                    EvaluatedRecommender::without_evaluation(recommender, "Engine is not evaluable")
                } else {
                    let cases = cases
                        .get_or_try_init(|| async {
                            Ok::<_, Error>(Arc::new(
                                self.service.read_annotation_cases(user, project_id).await?,
                            ))
                        })
                        .await?;
                    match self.evaluate(&recommender, factory, cases.clone()).await {
                        Ok(result) => decide(recommender, result),
                        Err(e) => {
                            error!(user, project_id, recommender_id = recommender.id,
                                recommender = %recommender.name, error = %e, "Evaluation failed");
                            continue;
                        }
                    }
                };

                evaluated_count += 1;
                self.publish(user, project_id, &evaluated, start.elapsed());
                if evaluated.active {
                    active.push(evaluated);
                }
            }

            active_count += active.len();
            self.service
                .recommenders()
                .set_active_recommenders(user, layer.id, active)
                .await?;
        }

        ctx.report_progress(100, Some("Selection done"));

        let training_enqueued = active_count > 0;
        if training_enqueued {
            self.service
                .enqueue(Task::training(user, project_id, "Selection completed"))
                .await?;
        } else {
            debug!(user, project_id, "No active recommenders, not scheduling training");
        }

        info!(user, project_id, evaluated = evaluated_count, active = active_count,
            "Recommender selection completed");
        Ok(json!({
            "evaluated": evaluated_count,
            "active": active_count,
            "training_enqueued": training_enqueued,
        }))
    }

    async fn evaluate(
        &self,
        recommender: &Recommender,
        factory: Arc<dyn RecommendationEngineFactory>,
        cases: Arc<Vec<Cas>>,
    ) -> Result<EvaluationResult> {
        let splitter = self.service.config().selection_splitter();
        let recommender = recommender.clone();
        guarded_blocking(move || {
            let engine = factory.build(&recommender)?;
            engine.evaluate(&cases, &splitter)
        })
        .await
    }

    fn publish(
        &self,
        user: &str,
        project_id: i64,
        evaluated: &EvaluatedRecommender,
        elapsed: Duration,
    ) {
        let recommender = &evaluated.recommender;
        let result = &evaluated.evaluation;
        let score = (!result.is_skipped()).then(|| result.f1_score());
        let duration_ms = elapsed.as_millis() as i64;

        info!(
            user,
            project_id,
            recommender_id = recommender.id,
            recommender = %recommender.name,
            active = evaluated.active,
            score = ?score,
            threshold = recommender.threshold,
            reason = result.skip_reason().unwrap_or_default(),
            duration_ms,
            "Recommender evaluated"
        );

        self.service.events().emit(ServerEvent::RecommenderEvaluated {
            user: user.to_string(),
            project_id,
            layer_id: recommender.layer.id,
            recommender_id: recommender.id,
            recommender_name: recommender.name.clone(),
            active: evaluated.active,
            score,
            threshold: recommender.threshold,
            duration_ms,
            skip_reason: result.skip_reason().map(String::from),
        });
    }
}

/// Skipped evaluations never activate; otherwise F1 must reach the threshold.
fn decide(recommender: Recommender, result: EvaluationResult) -> EvaluatedRecommender {
    if !result.is_skipped() && result.f1_score() >= recommender.threshold {
        EvaluatedRecommender::activated(recommender, result)
    } else {
        EvaluatedRecommender::rejected(recommender, result)
    }
}

#[async_trait]
impl TaskHandler for SelectionHandler {
    fn task_kind(&self) -> TaskKind {
        TaskKind::Selection
    }

    #[instrument(skip(self, ctx), fields(task_id = %ctx.task.id, user = %ctx.task.user,
        project_id = ctx.task.project_id))]
    async fn execute(&self, ctx: TaskContext) -> TaskResult {
        self.select(&ctx).await.into()
    }
}
