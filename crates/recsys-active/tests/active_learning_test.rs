//! Integration tests for the active-learning loop against the in-memory
//! backend.

use std::sync::Arc;

use recsys_active::ActiveLearningService;
use recsys_core::{
    AnnotationSuggestion, AutoAcceptMode, ChangeLocation, DocumentService, Error, EventBus,
    HideFlags, LearningRecordRepository, Position, PredictedAnnotation, PredictionStore,
    Predictions, Preferences, Recommender, ServerEvent, UserAction,
};
use recsys_store::test_fixtures::{
    entity_layer, entity_recommender, relation_layer, relation_recommender, token_offset,
    TestDataBuilder, ENTITY_LAYER, RELATION_LAYER, RELATION_LAYER_ID, TEST_PROJECT, TEST_USER,
    VALUE_FEATURE,
};
use recsys_store::MemoryStore;

struct Fixture {
    store: MemoryStore,
    predictions: Arc<PredictionStore>,
    events: Arc<EventBus>,
    service: ActiveLearningService,
    recommender: Recommender,
}

async fn fixture() -> Fixture {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let store = MemoryStore::new();
    TestDataBuilder::new(&store)
        .with_layers()
        .await
        .with_document("doc1", "w w w w")
        .await
        .with_document("doc2", "w w w w")
        .await;
    let predictions = Arc::new(PredictionStore::new());
    let events = Arc::new(EventBus::default());
    let service = ActiveLearningService::new(
        Arc::new(store.documents.clone()),
        Arc::new(store.schema.clone()),
        Arc::new(store.learning_records.clone()),
        predictions.clone(),
        events.clone(),
    );
    Fixture {
        store,
        predictions,
        events,
        service,
        recommender: entity_recommender(1, "mock"),
    }
}

fn suggestion(
    recommender: &Recommender,
    document: &str,
    token: usize,
    label: &str,
    score: f64,
) -> AnnotationSuggestion {
    PredictedAnnotation::new(Position::Span(token_offset(token)), Some(label.into()), score)
        .into_suggestion(recommender, document)
}

/// Publish `suggestions` as incoming and switch them to active.
async fn publish(f: &Fixture, suggestions: Vec<AnnotationSuggestion>) {
    let previous = f.predictions.latest(TEST_USER, TEST_PROJECT).await;
    let mut predictions = match &previous {
        Some(previous) => Predictions::from_predecessor(previous),
        None => Predictions::new(TEST_USER, TEST_PROJECT),
    };
    predictions.put_suggestions(suggestions);
    if let Some(previous) = &previous {
        predictions.inherit_suggestions(previous);
    }
    f.predictions.put_incoming(predictions).await;
    assert!(f.service.refresh(TEST_USER, TEST_PROJECT).await);
}

async fn active_suggestion(f: &Fixture, document: &str, id: i32) -> AnnotationSuggestion {
    f.predictions
        .active(TEST_USER, TEST_PROJECT)
        .await
        .expect("active predictions")
        .get(document, id)
        .cloned()
        .expect("suggestion present")
}

/// Two groups in doc1: a confident one on token 0 and an uncertain one on
/// token 1.
fn two_groups(recommender: &Recommender) -> Vec<AnnotationSuggestion> {
    vec![
        suggestion(recommender, "doc1", 0, "PER", 0.9),
        suggestion(recommender, "doc1", 0, "LOC", 0.1),
        suggestion(recommender, "doc1", 1, "PER", 0.5),
        suggestion(recommender, "doc1", 1, "LOC", 0.45),
    ]
}

#[tokio::test]
async fn test_refresh_switches_incoming_once() {
    let f = fixture().await;
    let mut events = f.events.subscribe();

    publish(&f, two_groups(&f.recommender)).await;
    assert!(!f.service.refresh(TEST_USER, TEST_PROJECT).await);
    assert!(!f.predictions.has_incoming(TEST_USER, TEST_PROJECT).await);

    match events.recv().await.unwrap().payload {
        ServerEvent::PredictionsSwitched { generation, .. } => assert_eq!(generation, 1),
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_next_suggestion_is_most_uncertain() {
    let f = fixture().await;
    publish(&f, two_groups(&f.recommender)).await;

    let groups = f.service.get_suggestions(TEST_USER, &entity_layer()).await;
    assert_eq!(groups.len(), 2);

    let next = f
        .service
        .generate_next_suggestion(TEST_USER, &entity_layer(), &Preferences::default())
        .await
        .unwrap()
        .expect("a suggestion");
    assert_eq!(next.first.position, Position::Span(token_offset(1)));
    assert_eq!(next.first.label(), Some("PER"));
    assert!((next.delta - 0.05).abs() < 1e-9);
}

#[tokio::test]
async fn test_reject_hides_and_records() {
    let f = fixture().await;
    publish(&f, two_groups(&f.recommender)).await;
    let layer = entity_layer();
    let first = f
        .service
        .generate_next_suggestion(TEST_USER, &layer, &Preferences::default())
        .await
        .unwrap()
        .unwrap();
    let mut events = f.events.subscribe();

    f.service
        .reject(
            TEST_USER,
            TEST_PROJECT,
            "doc1",
            first.first.id,
            ChangeLocation::ActiveLearningSidebar,
        )
        .await
        .unwrap();

    let hidden = active_suggestion(&f, "doc1", first.first.id).await;
    assert!(hidden.hiding_flags().contains(HideFlags::TRANSIENT_REJECTED));

    let records = f
        .store
        .learning_records
        .list_records(TEST_USER, TEST_PROJECT, None)
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].action, UserAction::Rejected);
    assert_eq!(records[0].label.as_deref(), Some("PER"));

    match events.recv().await.unwrap().payload {
        ServerEvent::SuggestionAction {
            action,
            location,
            suggestion_id,
            ..
        } => {
            assert_eq!(action, UserAction::Rejected);
            assert_eq!(location, ChangeLocation::ActiveLearningSidebar);
            assert_eq!(suggestion_id, first.first.id);
        }
        other => panic!("unexpected event {:?}", other),
    }

    // The remaining LOC suggestion on token 1 is now alone: delta 0.45.
    let next = f
        .service
        .generate_next_suggestion(TEST_USER, &layer, &Preferences::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(next.first.label(), Some("LOC"));
    assert_eq!(next.first.position, Position::Span(token_offset(1)));
}

#[tokio::test]
async fn test_accept_materializes_annotation() {
    let f = fixture().await;
    publish(&f, two_groups(&f.recommender)).await;
    let target = f
        .predictions
        .active(TEST_USER, TEST_PROJECT)
        .await
        .unwrap()
        .get_predictions_by_document("doc1")
        .iter()
        .find(|s| s.label() == Some("PER") && s.position == Position::Span(token_offset(0)))
        .cloned()
        .unwrap();

    let annotation_id = f
        .service
        .accept(
            TEST_USER,
            TEST_PROJECT,
            "doc1",
            target.id,
            ChangeLocation::MainEditor,
        )
        .await
        .unwrap();

    let document = f
        .store
        .documents
        .get_source_document(TEST_PROJECT, "doc1")
        .await
        .unwrap();
    let cas = f.store.documents.read_cas(&document, TEST_USER).await.unwrap();
    assert_eq!(cas.get(annotation_id).unwrap().feature(VALUE_FEATURE), Some("PER"));
    assert!(cas.contains_annotation(ENTITY_LAYER, &target.position, VALUE_FEATURE, Some("PER")));

    let accepted = active_suggestion(&f, "doc1", target.id).await;
    assert!(accepted.hiding_flags().contains(HideFlags::TRANSIENT_ACCEPTED));
    let records = f
        .store
        .learning_records
        .list_records(TEST_USER, TEST_PROJECT, None)
        .await
        .unwrap();
    assert_eq!(records[0].action, UserAction::Accepted);
}

#[tokio::test]
async fn test_accept_relation_creates_endpoints_and_relation() {
    let f = fixture().await;
    let recommender = relation_recommender(2, "mock");
    let position = Position::relation(token_offset(0), token_offset(1));
    let relation = |label: &str, score: f64| {
        PredictedAnnotation::new(position, Some(label.into()), score)
            .into_suggestion(&recommender, "doc1")
    };
    publish(&f, vec![relation("livesIn", 0.7), relation("worksAt", 0.3)]).await;
    let layer = relation_layer();

    let next = f
        .service
        .generate_next_suggestion(TEST_USER, &layer, &Preferences::default())
        .await
        .unwrap()
        .expect("a relation suggestion");
    assert_eq!(next.first.label(), Some("livesIn"));
    assert_eq!(next.first.position, position);

    let annotation_id = f
        .service
        .accept(
            TEST_USER,
            TEST_PROJECT,
            "doc1",
            next.first.id,
            ChangeLocation::ActiveLearningSidebar,
        )
        .await
        .unwrap();

    let document = f
        .store
        .documents
        .get_source_document(TEST_PROJECT, "doc1")
        .await
        .unwrap();
    let cas = f.store.documents.read_cas(&document, TEST_USER).await.unwrap();
    assert_eq!(cas.get(annotation_id).unwrap().feature(VALUE_FEATURE), Some("livesIn"));
    assert!(cas.contains_annotation(RELATION_LAYER, &position, VALUE_FEATURE, Some("livesIn")));
    assert_eq!(cas.spans_at(ENTITY_LAYER, token_offset(0)).count(), 1);
    assert_eq!(cas.spans_at(ENTITY_LAYER, token_offset(1)).count(), 1);

    let records = f
        .store
        .learning_records
        .list_records(TEST_USER, TEST_PROJECT, Some(RELATION_LAYER_ID))
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].action, UserAction::Accepted);
    assert_eq!(records[0].position, position);

    // The accepted label is hidden; the other relation label is next.
    let next = f
        .service
        .generate_next_suggestion(TEST_USER, &layer, &Preferences::default())
        .await
        .unwrap()
        .expect("remaining relation suggestion");
    assert_eq!(next.first.label(), Some("worksAt"));
}

#[tokio::test]
async fn test_correct_writes_new_label_and_rejects_original() {
    let f = fixture().await;
    publish(&f, vec![suggestion(&f.recommender, "doc2", 2, "PER", 0.6)]).await;
    let id = f
        .predictions
        .active(TEST_USER, TEST_PROJECT)
        .await
        .unwrap()
        .get_predictions_by_document("doc2")[0]
        .id;

    f.service
        .correct(
            TEST_USER,
            TEST_PROJECT,
            "doc2",
            id,
            "ORG",
            ChangeLocation::MainEditor,
        )
        .await
        .unwrap();

    let document = f
        .store
        .documents
        .get_source_document(TEST_PROJECT, "doc2")
        .await
        .unwrap();
    let cas = f.store.documents.read_cas(&document, TEST_USER).await.unwrap();
    let position = Position::Span(token_offset(2));
    assert!(cas.contains_annotation(ENTITY_LAYER, &position, VALUE_FEATURE, Some("ORG")));
    assert!(!cas.contains_annotation(ENTITY_LAYER, &position, VALUE_FEATURE, Some("PER")));

    let records = f
        .store
        .learning_records
        .list_records(TEST_USER, TEST_PROJECT, None)
        .await
        .unwrap();
    let summary: Vec<(UserAction, Option<&str>)> = records
        .iter()
        .map(|r| (r.action, r.label.as_deref()))
        .collect();
    assert_eq!(
        summary,
        vec![
            (UserAction::Rejected, Some("PER")),
            (UserAction::Corrected, Some("ORG")),
        ]
    );
    assert!(active_suggestion(&f, "doc2", id)
        .await
        .hiding_flags()
        .contains(HideFlags::TRANSIENT_CORRECTED));
}

#[tokio::test]
async fn test_skipped_suggestion_stays_hidden_after_new_predictions() {
    let f = fixture().await;
    let layer = entity_layer();
    publish(&f, vec![suggestion(&f.recommender, "doc1", 3, "LOC", 0.4)]).await;
    let next = f
        .service
        .generate_next_suggestion(TEST_USER, &layer, &Preferences::default())
        .await
        .unwrap()
        .unwrap();

    f.service
        .skip(
            TEST_USER,
            TEST_PROJECT,
            "doc1",
            next.first.id,
            ChangeLocation::ActiveLearningSidebar,
        )
        .await
        .unwrap();
    assert!(active_suggestion(&f, "doc1", next.first.id)
        .await
        .hiding_flags()
        .contains(HideFlags::SKIPPED));

    // A new run produces the same suggestion without any flags.
    publish(&f, vec![suggestion(&f.recommender, "doc1", 3, "LOC", 0.4)]).await;
    assert!(active_suggestion(&f, "doc1", next.first.id).await.is_visible());

    let again = f
        .service
        .generate_next_suggestion(TEST_USER, &layer, &Preferences::default())
        .await
        .unwrap();
    assert!(again.is_none());
}

#[tokio::test]
async fn test_auto_accept_on_first_access() {
    let f = fixture().await;
    publish(
        &f,
        vec![
            suggestion(&f.recommender, "doc1", 0, "PER", 0.9)
                .with_auto_accept(AutoAcceptMode::OnFirstAccess),
            suggestion(&f.recommender, "doc1", 1, "LOC", 0.9),
        ],
    )
    .await;

    let accepted = f
        .service
        .auto_accept_on_first_access(TEST_USER, TEST_PROJECT, "doc1")
        .await
        .unwrap();
    assert_eq!(accepted, 1);

    let records = f
        .store
        .learning_records
        .list_records(TEST_USER, TEST_PROJECT, None)
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].location, ChangeLocation::AutoAccept);

    // Already accepted suggestions are hidden, so a second access is a no-op.
    let again = f
        .service
        .auto_accept_on_first_access(TEST_USER, TEST_PROJECT, "doc1")
        .await
        .unwrap();
    assert_eq!(again, 0);
}

#[tokio::test]
async fn test_failed_materialization_records_nothing() {
    let f = fixture().await;
    // A span suggestion on the relation layer cannot be placed.
    let mut misplaced = suggestion(&f.recommender, "doc1", 0, "PER", 0.9);
    misplaced.layer_id = RELATION_LAYER_ID;
    publish(&f, vec![misplaced]).await;
    let id = f
        .predictions
        .active(TEST_USER, TEST_PROJECT)
        .await
        .unwrap()
        .get_predictions_by_document("doc1")[0]
        .id;

    let result = f
        .service
        .accept(TEST_USER, TEST_PROJECT, "doc1", id, ChangeLocation::MainEditor)
        .await;
    assert!(matches!(result, Err(Error::InvalidInput(_))));
    assert!(f
        .store
        .learning_records
        .list_records(TEST_USER, TEST_PROJECT, None)
        .await
        .unwrap()
        .is_empty());
    assert!(active_suggestion(&f, "doc1", id).await.is_visible());
}

#[tokio::test]
async fn test_unknown_suggestion_is_not_found() {
    let f = fixture().await;
    let result = f
        .service
        .reject(TEST_USER, TEST_PROJECT, "doc1", 99, ChangeLocation::MainEditor)
        .await;
    assert!(matches!(result, Err(Error::NotFound(_))));
}
