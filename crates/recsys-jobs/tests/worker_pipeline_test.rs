//! End-to-end tests: the worker runs selection, training and prediction in
//! sequence for a triggered (user, project).

mod helpers;

use std::sync::Arc;
use std::time::{Duration, Instant};

use recsys_core::{Position, PredictedAnnotation, RecommenderRepository};
use recsys_jobs::{pipeline_worker, EnqueueOutcome, Task, TaskKind, WorkerConfig, WorkerEvent};
use recsys_store::mock::{MockEngineFactory, MockOperation};
use recsys_store::test_fixtures::{
    entity_recommender, token_offset, TestDataBuilder, ENTITY_LAYER_ID, TEST_PROJECT, TEST_USER,
};
use recsys_store::MemoryStore;

use helpers::service_for;

fn fast_config() -> WorkerConfig {
    WorkerConfig::default()
        .with_poll_interval(10)
        .with_max_concurrent(2)
}

#[tokio::test]
async fn test_trigger_runs_full_pipeline() {
    let store = MemoryStore::new();
    TestDataBuilder::new(&store)
        .with_layers()
        .await
        .with_annotated_document("doc1", 60)
        .await
        .with_document("doc2", "w w w")
        .await;
    store
        .recommenders
        .save_recommender(entity_recommender(1, "mock").with_threshold(0.5))
        .await;
    let factory = MockEngineFactory::new("mock")
        .with_f1(0.9)
        .with_prediction(PredictedAnnotation::new(
            Position::Span(token_offset(1)),
            Some("LOC".into()),
            0.7,
        ));
    let service = service_for(&store, vec![Arc::new(factory.clone())]);

    let handle = pipeline_worker(&service)
        .with_config(fast_config())
        .build()
        .await
        .start();
    let mut worker_events = handle.events();

    service
        .trigger_selection(TEST_USER, TEST_PROJECT, "Document opened")
        .await
        .unwrap();
    assert!(service.queue().wait_until_idle(Duration::from_secs(5)).await);

    let active = store
        .recommenders
        .get_active_recommenders(TEST_USER, ENTITY_LAYER_ID)
        .await
        .unwrap();
    assert_eq!(active.len(), 1);
    assert!(store
        .recommenders
        .get_context(TEST_USER, 1)
        .await
        .unwrap()
        .is_some());

    let incoming = service
        .predictions()
        .incoming(TEST_USER, TEST_PROJECT)
        .await
        .expect("incoming predictions after pipeline run");
    assert_eq!(incoming.get_predictions_by_document("doc2").len(), 1);
    assert_eq!(factory.call_count(MockOperation::Evaluate), 1);
    assert_eq!(factory.call_count(MockOperation::Train), 1);
    assert_eq!(factory.call_count(MockOperation::Predict), 2);

    let mut completed = Vec::new();
    while let Ok(event) = worker_events.try_recv() {
        if let WorkerEvent::TaskCompleted { kind, .. } = event {
            completed.push(kind);
        }
    }
    assert_eq!(
        completed,
        vec![TaskKind::Selection, TaskKind::Training, TaskKind::Prediction]
    );

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_inactive_recommenders_stop_after_selection() {
    let store = MemoryStore::new();
    TestDataBuilder::new(&store)
        .with_layers()
        .await
        .with_annotated_document("doc1", 60)
        .await;
    store
        .recommenders
        .save_recommender(entity_recommender(1, "mock").with_threshold(0.95))
        .await;
    let factory = MockEngineFactory::new("mock").with_f1(0.5);
    let service = service_for(&store, vec![Arc::new(factory.clone())]);
    let handle = pipeline_worker(&service)
        .with_config(fast_config())
        .build()
        .await
        .start();

    service
        .trigger_selection(TEST_USER, TEST_PROJECT, "Annotation created")
        .await
        .unwrap();
    assert!(service.queue().wait_until_idle(Duration::from_secs(5)).await);

    assert_eq!(factory.call_count(MockOperation::Train), 0);
    assert!(service
        .predictions()
        .incoming(TEST_USER, TEST_PROJECT)
        .await
        .is_none());

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_slow_training_is_cut_off_by_task_timeout() {
    let store = MemoryStore::new();
    TestDataBuilder::new(&store)
        .with_layers()
        .await
        .with_annotated_document("doc1", 60)
        .await;
    store
        .recommenders
        .save_recommender(entity_recommender(1, "mock").with_threshold(0.5))
        .await;
    let factory = MockEngineFactory::new("mock")
        .with_f1(0.9)
        .with_delay(MockOperation::Train, Duration::from_secs(2));
    let service = service_for(&store, vec![Arc::new(factory.clone())]);
    let handle = pipeline_worker(&service)
        .with_config(fast_config().with_task_timeout(1))
        .build()
        .await
        .start();
    let mut worker_events = handle.events();

    service
        .trigger_selection(TEST_USER, TEST_PROJECT, "Document opened")
        .await
        .unwrap();

    let mut training_started = None;
    loop {
        match worker_events.recv().await.unwrap() {
            WorkerEvent::TaskStarted {
                kind: TaskKind::Training,
                ..
            } => training_started = Some(Instant::now()),
            WorkerEvent::TaskFailed { kind, error, .. } => {
                assert_eq!(kind, TaskKind::Training);
                assert!(error.contains("timeout"));
                break;
            }
            WorkerEvent::TaskCompleted {
                kind: TaskKind::Training,
                ..
            } => panic!("training outlived the task timeout"),
            _ => continue,
        }
    }
    let started = training_started.expect("training started");
    assert!(started.elapsed() < Duration::from_millis(1800));
    assert!(service.queue().wait_until_idle(Duration::from_secs(5)).await);

    assert!(store
        .recommenders
        .get_context(TEST_USER, 1)
        .await
        .unwrap()
        .is_none());
    assert_eq!(factory.call_count(MockOperation::Predict), 0);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_repeated_triggers_coalesce() {
    let store = MemoryStore::new();
    let service = service_for(&store, vec![]);

    let first = service
        .trigger_selection(TEST_USER, TEST_PROJECT, "first")
        .await
        .unwrap();
    let second = service
        .trigger_selection(TEST_USER, TEST_PROJECT, "second")
        .await
        .unwrap();
    service
        .enqueue(Task::selection("bob", TEST_PROJECT, "other user"))
        .await
        .unwrap();

    let EnqueueOutcome::Queued(first_id) = first else {
        panic!("first trigger should queue");
    };
    match second {
        EnqueueOutcome::Replaced { replaced, .. } => assert_eq!(replaced, first_id),
        other => panic!("unexpected {:?}", other),
    }
    let queued = service.queue().queued_tasks().await;
    assert_eq!(queued.len(), 2);
    assert_eq!(queued[1].trigger, "second");
}

#[tokio::test]
async fn test_reset_state_cancels_tasks_and_clears_predictions() {
    let store = MemoryStore::new();
    let service = service_for(&store, vec![]);
    service
        .trigger_selection(TEST_USER, TEST_PROJECT, "opened")
        .await
        .unwrap();
    service
        .predictions()
        .put_incoming(recsys_core::Predictions::new(TEST_USER, TEST_PROJECT))
        .await;

    service.reset_state(TEST_USER, TEST_PROJECT).await;

    assert_eq!(service.queue().pending_count().await, 0);
    assert!(service
        .predictions()
        .incoming(TEST_USER, TEST_PROJECT)
        .await
        .is_none());
}
