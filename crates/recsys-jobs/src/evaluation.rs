//! Learning curves: evaluate a recommender on growing training sets.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use recsys_core::{DataSplitter, Error, EvaluationResult, RecommendationEngine, Result};

use crate::guard::{guarded, guarded_blocking};
use crate::service::RecommendationService;

#[derive(Debug, Clone, Serialize)]
pub struct LearningCurvePoint {
    pub training_size: usize,
    pub f1: f64,
    pub result: EvaluationResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct LearningCurve {
    pub recommender_id: i64,
    /// Annotated instances the engine estimated in the pool.
    pub estimated_size: usize,
    pub points: Vec<LearningCurvePoint>,
    /// Steps that were skipped or failed.
    pub skipped_steps: usize,
}

impl LearningCurve {
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl RecommendationService {
    /// Evaluate a recommender once per incremental step.
    ///
    /// Steps the engine skips (or fails on) are left out of the curve.
    pub async fn learning_curve(
        &self,
        user: &str,
        project_id: i64,
        recommender_id: i64,
    ) -> Result<LearningCurve> {
        let Some((recommender, factory)) = self.resolve_recommender(recommender_id).await? else {
            return Err(Error::NotFound(format!(
                "Recommender {} is not available for evaluation",
                recommender_id
            )));
        };

        let cases = Arc::new(self.read_annotation_cases(user, project_id).await?);
        let engine: Arc<dyn RecommendationEngine> =
            Arc::from(guarded(|| factory.build(&recommender))?);
        let estimated_size = engine.estimate_sample_count(&cases);

        let mut points = Vec::new();
        let mut skipped_steps = 0;
        for step in self.config().curve_splitter(estimated_size) {
            let splitter = DataSplitter::Incremental(step);
            let (engine, cases) = (engine.clone(), cases.clone());
            match guarded_blocking(move || engine.evaluate(&cases, &splitter)).await {
                Ok(result) if result.is_skipped() => {
                    debug!(recommender_id, training_limit = step.training_limit,
                        reason = result.skip_reason().unwrap_or_default(), "Curve step skipped");
                    skipped_steps += 1;
                }
                Ok(result) => points.push(LearningCurvePoint {
                    // Engines that do not report set sizes get the step's limit.
                    training_size: match result.training_set_size {
                        0 => step.training_limit,
                        reported => reported,
                    },
                    f1: result.f1_score(),
                    result,
                }),
                Err(e) => {
                    warn!(recommender_id, training_limit = step.training_limit, error = %e,
                        "Curve step failed");
                    skipped_steps += 1;
                }
            }
        }

        info!(user, project_id, recommender_id, estimated_size, points = points.len(),
            skipped_steps, "Learning curve computed");
        Ok(LearningCurve {
            recommender_id,
            estimated_size,
            points,
            skipped_steps,
        })
    }
}
