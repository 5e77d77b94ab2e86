//! Test helpers for pipeline integration tests.
//!
//! Wires a [`RecommendationService`] onto the in-memory store and provides
//! shortcuts for running single stages.

#![allow(dead_code)]

use std::sync::Arc;

use recsys_core::{
    EvaluatedRecommender, RecommendationEngineFactory, Recommender, RecommenderContext,
    RecommenderRepository,
};
use recsys_jobs::{
    EngineRegistry, PipelineConfig, PredictionHandler, RecommendationService, SelectionHandler,
    Task, TaskContext, TaskHandler, TaskKind, TaskResult, TrainingHandler,
};
use recsys_store::test_fixtures::{TEST_PROJECT, TEST_USER};
use recsys_store::MemoryStore;

/// Route `RUST_LOG`-filtered output through the test harness.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn service_for(
    store: &MemoryStore,
    factories: Vec<Arc<dyn RecommendationEngineFactory>>,
) -> RecommendationService {
    init_tracing();
    let mut registry = EngineRegistry::new();
    for factory in factories {
        registry.register(factory);
    }
    RecommendationService::new(
        Arc::new(store.documents.clone()),
        Arc::new(store.schema.clone()),
        Arc::new(store.recommenders.clone()),
        Arc::new(store.learning_records.clone()),
        registry,
    )
    .with_config(PipelineConfig::default())
}

/// Run one stage for the test user and project.
pub async fn run_stage(service: &RecommendationService, kind: TaskKind) -> TaskResult {
    let task = Task::new(kind, TEST_USER, TEST_PROJECT, "test");
    let ctx = TaskContext::new(task);
    match kind {
        TaskKind::Selection => SelectionHandler::new(service.clone()).execute(ctx).await,
        TaskKind::Training => TrainingHandler::new(service.clone()).execute(ctx).await,
        TaskKind::Prediction => PredictionHandler::new(service.clone()).execute(ctx).await,
    }
}

pub async fn queued_kinds(service: &RecommendationService) -> Vec<TaskKind> {
    service
        .queue()
        .queued_tasks()
        .await
        .into_iter()
        .map(|t| t.kind)
        .collect()
}

/// Mark `recommender` active for the test user without evaluation.
pub async fn activate(store: &MemoryStore, recommender: &Recommender) {
    store
        .recommenders
        .set_active_recommenders(
            TEST_USER,
            recommender.layer.id,
            vec![EvaluatedRecommender::without_evaluation(
                recommender.clone(),
                "test",
            )],
        )
        .await
        .expect("Failed to activate recommender");
}

/// Publish a closed, ready context for `recommender`.
pub async fn publish_ready_context(store: &MemoryStore, recommender: &Recommender) {
    let mut context = RecommenderContext::empty();
    context.mark_ready().expect("Failed to mark context ready");
    context.close();
    store
        .recommenders
        .put_context(TEST_USER, recommender.id, Arc::new(context))
        .await
        .expect("Failed to publish context");
}

pub fn assert_success(result: &TaskResult) {
    assert!(
        matches!(result, TaskResult::Success(_)),
        "expected success, got {:?}",
        result
    );
}
