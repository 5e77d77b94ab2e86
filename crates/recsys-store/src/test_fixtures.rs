//! Test fixtures for pipeline integration tests.
//!
//! Provides a standard project layout (one span layer with a `value`
//! feature, one relation layer on top of it) and a builder that fills a
//! [`MemoryStore`] with documents, annotations and recommenders.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use recsys_store::test_fixtures::{TestDataBuilder, entity_recommender, TEST_USER};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let store = MemoryStore::new();
//!     TestDataBuilder::new(&store)
//!         .with_layers()
//!         .await
//!         .with_annotated_document("doc1", 30)
//!         .await
//!         .with_recommender(entity_recommender(1, "mock"))
//!         .await;
//!
//!     // Run your tests...
//! }
//! ```

use std::collections::BTreeMap;

use recsys_core::{
    AnnotationDocumentState, AnnotationFeature, AnnotationLayer, DocumentService, Offset,
    Recommender, SourceDocument,
};

use crate::MemoryStore;

pub const TEST_USER: &str = "alice";
pub const TEST_PROJECT: i64 = 1;

pub const ENTITY_LAYER_ID: i64 = 10;
pub const ENTITY_LAYER: &str = "custom.Entity";
pub const RELATION_LAYER_ID: i64 = 20;
pub const RELATION_LAYER: &str = "custom.Relation";
pub const VALUE_FEATURE: &str = "value";

/// Labels cycled through by [`TestDataBuilder::with_annotated_document`].
pub const LABELS: [&str; 2] = ["PER", "LOC"];

pub fn entity_layer() -> AnnotationLayer {
    AnnotationLayer::span(ENTITY_LAYER_ID, TEST_PROJECT, ENTITY_LAYER)
}

pub fn relation_layer() -> AnnotationLayer {
    AnnotationLayer::relation(RELATION_LAYER_ID, TEST_PROJECT, RELATION_LAYER, ENTITY_LAYER)
}

pub fn entity_feature() -> AnnotationFeature {
    AnnotationFeature::new(ENTITY_LAYER_ID * 10, ENTITY_LAYER_ID, VALUE_FEATURE)
}

pub fn relation_feature() -> AnnotationFeature {
    AnnotationFeature::new(RELATION_LAYER_ID * 10, RELATION_LAYER_ID, VALUE_FEATURE)
}

/// Enabled recommender on the entity layer using engine `tool`.
pub fn entity_recommender(id: i64, tool: &str) -> Recommender {
    Recommender::new(id, format!("{}-{}", tool, id), entity_layer(), entity_feature(), tool)
}

/// Enabled recommender on the relation layer using engine `tool`.
pub fn relation_recommender(id: i64, tool: &str) -> Recommender {
    Recommender::new(
        id,
        format!("{}-{}", tool, id),
        relation_layer(),
        relation_feature(),
        tool,
    )
}

/// Text of `words` two-character tokens (`"w "` repeated); token `i` spans
/// `[2i, 2i + 1)`.
pub fn token_text(words: usize) -> String {
    "w ".repeat(words)
}

pub fn token_offset(i: usize) -> Offset {
    let begin = (i * 2) as i32;
    Offset::new(begin, begin + 1)
}

/// Builder for test data in a [`MemoryStore`].
pub struct TestDataBuilder<'a> {
    store: &'a MemoryStore,
    documents: Vec<SourceDocument>,
}

impl<'a> TestDataBuilder<'a> {
    pub fn new(store: &'a MemoryStore) -> Self {
        Self {
            store,
            documents: Vec::new(),
        }
    }

    /// Register the entity and relation layers.
    pub async fn with_layers(self) -> Self {
        self.store.schema.add_layer(entity_layer()).await;
        self.store.schema.add_layer(relation_layer()).await;
        self
    }

    pub async fn with_recommender(self, recommender: Recommender) -> Self {
        self.store.recommenders.save_recommender(recommender).await;
        self
    }

    /// Plain document without annotations.
    pub async fn with_document(mut self, name: &str, text: &str) -> Self {
        let document = self.store.documents.add_document(TEST_PROJECT, name, text).await;
        self.documents.push(document);
        self
    }

    /// Document whose every token carries an entity annotation for
    /// [`TEST_USER`], labels cycling through [`LABELS`].
    pub async fn with_annotated_document(mut self, name: &str, annotations: usize) -> Self {
        let document = self
            .store
            .documents
            .add_document(TEST_PROJECT, name, &token_text(annotations))
            .await;
        let mut cas = self
            .store
            .documents
            .read_cas(&document, TEST_USER)
            .await
            .expect("Failed to read fixture CAS");
        for i in 0..annotations {
            let features = BTreeMap::from([(
                VALUE_FEATURE.to_string(),
                LABELS[i % LABELS.len()].to_string(),
            )]);
            cas.add_span(ENTITY_LAYER, token_offset(i), features)
                .expect("Failed to add fixture annotation");
        }
        self.store
            .documents
            .write_cas(&document, TEST_USER, &cas)
            .await
            .expect("Failed to write fixture CAS");
        self.documents.push(document);
        self
    }

    pub async fn with_state(self, name: &str, state: AnnotationDocumentState) -> Self {
        let document = self
            .documents
            .iter()
            .find(|d| d.name == name)
            .expect("Unknown fixture document")
            .clone();
        self.store.documents.set_state(&document, TEST_USER, state).await;
        self
    }

    pub fn documents(&self) -> &[SourceDocument] {
        &self.documents
    }

    pub fn build(self) -> Vec<SourceDocument> {
        self.documents
    }
}
