//! # recsys-store
//!
//! In-memory backend for the recsys collaborator traits.
//!
//! This crate provides:
//! - [`MemoryDocumentService`]: source documents, per-user CAS and document state
//! - [`MemorySchemaService`]: layers and suggestion materialization
//! - [`MemoryRecommenderRepository`]: recommender configuration, contexts, active lists
//! - [`MemoryLearningRecordRepository`]: the append-only learning record
//! - [`mock`]: a scriptable recommendation engine
//! - [`test_fixtures`]: standard project layout and a data builder
//!
//! ## Example
//!
//! ```rust,ignore
//! use recsys_store::MemoryStore;
//!
//! let store = MemoryStore::new();
//! let doc = store.documents.add_document(1, "doc1", "John lives in Berlin").await;
//! let cas = store.documents.read_cas(&doc, "alice").await?;
//! ```

pub mod documents;
pub mod learning_records;
pub mod mock;
pub mod recommenders;
pub mod schema;
pub mod test_fixtures;

pub use documents::MemoryDocumentService;
pub use learning_records::MemoryLearningRecordRepository;
pub use recommenders::MemoryRecommenderRepository;
pub use schema::MemorySchemaService;

/// All in-memory repositories bundled together. Clones share storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    pub documents: MemoryDocumentService,
    pub schema: MemorySchemaService,
    pub recommenders: MemoryRecommenderRepository,
    pub learning_records: MemoryLearningRecordRepository,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}
