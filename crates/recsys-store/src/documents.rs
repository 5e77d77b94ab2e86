//! In-memory document service.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use recsys_core::{
    AnnotationDocumentState, Cas, DocumentService, Error, Result, SourceDocument,
};

#[derive(Debug, Default)]
struct DocumentState {
    next_id: i64,
    /// (project, name) -> document
    documents: BTreeMap<(i64, String), SourceDocument>,
    texts: HashMap<i64, String>,
    cas: HashMap<(i64, String), Cas>,
    states: HashMap<(i64, String), AnnotationDocumentState>,
    broken: HashSet<i64>,
}

/// In-memory implementation of [`DocumentService`].
///
/// Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryDocumentService {
    inner: Arc<RwLock<DocumentState>>,
    cas_reads: Arc<AtomicUsize>,
    state_listings: Arc<AtomicUsize>,
}

impl MemoryDocumentService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source document. Re-adding a name replaces its text.
    pub async fn add_document(
        &self,
        project_id: i64,
        name: &str,
        text: &str,
    ) -> SourceDocument {
        let mut state = self.inner.write().await;
        let key = (project_id, name.to_string());
        if let Some(existing) = state.documents.get(&key).cloned() {
            state.texts.insert(existing.id, text.to_string());
            return existing;
        }
        state.next_id += 1;
        let document = SourceDocument {
            id: state.next_id,
            project_id,
            name: name.to_string(),
        };
        state.documents.insert(key, document.clone());
        state.texts.insert(document.id, text.to_string());
        document
    }

    pub async fn set_state(&self, document: &SourceDocument, user: &str, value: AnnotationDocumentState) {
        self.inner
            .write()
            .await
            .states
            .insert((document.id, user.to_string()), value);
    }

    /// Make every subsequent CAS read of `document` fail.
    pub async fn break_document(&self, document: &SourceDocument) {
        self.inner.write().await.broken.insert(document.id);
    }

    /// Number of `read_cas` calls served so far.
    pub fn cas_reads(&self) -> usize {
        self.cas_reads.load(Ordering::SeqCst)
    }

    /// Number of `list_documents_with_state` calls served so far.
    pub fn state_listings(&self) -> usize {
        self.state_listings.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentService for MemoryDocumentService {
    async fn list_source_documents(&self, project_id: i64) -> Result<Vec<SourceDocument>> {
        let state = self.inner.read().await;
        Ok(state
            .documents
            .iter()
            .filter(|((project, _), _)| *project == project_id)
            .map(|(_, d)| d.clone())
            .collect())
    }

    async fn get_source_document(&self, project_id: i64, name: &str) -> Result<SourceDocument> {
        self.inner
            .read()
            .await
            .documents
            .get(&(project_id, name.to_string()))
            .cloned()
            .ok_or_else(|| Error::DocumentNotFound(name.to_string()))
    }

    async fn read_cas(&self, document: &SourceDocument, user: &str) -> Result<Cas> {
        self.cas_reads.fetch_add(1, Ordering::SeqCst);
        let state = self.inner.read().await;
        if state.broken.contains(&document.id) {
            return Err(Error::Cas(format!("Unable to read CAS of '{}'", document.name)));
        }
        if let Some(cas) = state.cas.get(&(document.id, user.to_string())) {
            return Ok(cas.clone());
        }
        let text = state
            .texts
            .get(&document.id)
            .ok_or_else(|| Error::DocumentNotFound(document.name.clone()))?;
        Ok(Cas::new(document.name.clone(), text.clone()))
    }

    async fn write_cas(&self, document: &SourceDocument, user: &str, cas: &Cas) -> Result<()> {
        let mut state = self.inner.write().await;
        if !state.texts.contains_key(&document.id) {
            return Err(Error::DocumentNotFound(document.name.clone()));
        }
        state
            .cas
            .insert((document.id, user.to_string()), cas.clone());
        Ok(())
    }

    async fn list_documents_with_state(
        &self,
        project_id: i64,
        user: &str,
    ) -> Result<Vec<(SourceDocument, AnnotationDocumentState)>> {
        self.state_listings.fetch_add(1, Ordering::SeqCst);
        let state = self.inner.read().await;
        Ok(state
            .documents
            .iter()
            .filter(|((project, _), _)| *project == project_id)
            .map(|(_, d)| {
                let value = state
                    .states
                    .get(&(d.id, user.to_string()))
                    .copied()
                    .unwrap_or_default();
                (d.clone(), value)
            })
            .collect())
    }
}
