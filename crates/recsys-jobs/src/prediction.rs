//! Prediction stage: compute incoming predictions for (user, project).

use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use tracing::{info, instrument};

use recsys_core::{Result, ServerEvent};

use crate::handler::{TaskContext, TaskHandler, TaskResult};
use crate::service::RecommendationService;
use crate::task::TaskKind;

pub struct PredictionHandler {
    service: RecommendationService,
}

impl PredictionHandler {
    pub fn new(service: RecommendationService) -> Self {
        Self { service }
    }

    async fn predict(&self, ctx: &TaskContext) -> Result<JsonValue> {
        let start = Instant::now();
        let user = ctx.user();
        let project_id = ctx.project_id();

        let documents = self
            .service
            .documents()
            .list_source_documents(project_id)
            .await?;
        ctx.report_progress(10, Some("Predicting"));

        let predictions = self
            .service
            .compute_predictions(user, project_id, &documents, ctx.cancellation())
            .await?;
        ctx.check_cancelled()?;

        let summary = json!({
            "generation": predictions.generation(),
            "documents": documents.len(),
            "suggestions": predictions.len(),
            "added": predictions.added_count(),
            "aged": predictions.aged_count(),
            "removed": predictions.removed_count(),
        });
        let event = ServerEvent::PredictionsComputed {
            user: user.to_string(),
            project_id,
            generation: predictions.generation(),
            suggestions: predictions.len(),
            added: predictions.added_count(),
            aged: predictions.aged_count(),
            removed: predictions.removed_count(),
            duration_ms: start.elapsed().as_millis() as i64,
        };

        self.service.predictions().put_incoming(predictions).await;
        self.service.events().emit(event);
        ctx.report_progress(100, Some("Predictions ready"));

        info!(user, project_id, duration_ms = start.elapsed().as_millis() as u64,
            "Incoming predictions stored");
        Ok(summary)
    }
}

#[async_trait]
impl TaskHandler for PredictionHandler {
    fn task_kind(&self) -> TaskKind {
        TaskKind::Prediction
    }

    #[instrument(skip(self, ctx), fields(task_id = %ctx.task.id, user = %ctx.task.user,
        project_id = ctx.task.project_id))]
    async fn execute(&self, ctx: TaskContext) -> TaskResult {
        self.predict(&ctx).await.into()
    }
}
