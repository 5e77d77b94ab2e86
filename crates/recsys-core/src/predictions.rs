//! Versioned prediction sets.
//!
//! A [`Predictions`] holds every suggestion computed in one prediction run for
//! a (user, project) pair. Consecutive runs are chained: the new instance is
//! built from its predecessor and [`Predictions::inherit_suggestions`] carries
//! numeric ids over for suggestions that are "the same" (same
//! [`SuggestionKey`]), so decisions taken on a suggestion stay attached to it.
//!
//! [`PredictionStore`] keeps an "incoming" and an "active" instance per pair.
//! The prediction stage writes incoming; a switch promotes it to active.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::suggestion::{
    group_suggestions, AnnotationSuggestion, Offset, SuggestionGroup, SuggestionKey,
    UNASSIGNED_ID,
};

// =============================================================================
// LOG
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// Message produced while computing predictions, shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMessage {
    pub level: LogLevel,
    pub source: String,
    pub message: String,
}

// =============================================================================
// PREDICTIONS
// =============================================================================

#[derive(Debug, Clone)]
pub struct Predictions {
    user: String,
    project_id: i64,
    generation: i32,
    next_id: i32,
    documents: BTreeMap<String, Vec<AnnotationSuggestion>>,
    predicted_documents: BTreeSet<String>,
    log: Vec<LogMessage>,
    added: usize,
    aged: usize,
    removed: usize,
    created_at: DateTime<Utc>,
}

impl Predictions {
    /// First generation for a (user, project) pair.
    pub fn new(user: impl Into<String>, project_id: i64) -> Self {
        Self {
            user: user.into(),
            project_id,
            generation: 1,
            next_id: 0,
            documents: BTreeMap::new(),
            predicted_documents: BTreeSet::new(),
            log: Vec::new(),
            added: 0,
            aged: 0,
            removed: 0,
            created_at: Utc::now(),
        }
    }

    /// Empty successor of `previous`. Nothing is carried over yet; see
    /// [`inherit_suggestions`](Self::inherit_suggestions) and
    /// [`inherit_documents`](Self::inherit_documents).
    pub fn from_predecessor(previous: &Predictions) -> Self {
        let mut next = Self::new(previous.user.clone(), previous.project_id);
        next.generation = previous.generation + 1;
        next.next_id = previous.next_id;
        next
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn project_id(&self) -> i64 {
        self.project_id
    }

    pub fn generation(&self) -> i32 {
        self.generation
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Suggestions added in this run (not matched against the predecessor).
    pub fn added_count(&self) -> usize {
        self.added
    }

    /// Suggestions carried over from the predecessor with a kept id.
    pub fn aged_count(&self) -> usize {
        self.aged
    }

    /// Suggestions of the predecessor that disappeared in re-predicted documents.
    pub fn removed_count(&self) -> usize {
        self.removed
    }

    pub fn len(&self) -> usize {
        self.documents.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.values().all(Vec::is_empty)
    }

    /// Next free suggestion id.
    pub fn next_id(&mut self) -> i32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn reserve_above(&mut self, id: i32) {
        if id >= self.next_id {
            self.next_id = id + 1;
        }
    }

    /// Store freshly computed suggestions, assigning ids to those without one.
    pub fn put_suggestions(&mut self, suggestions: impl IntoIterator<Item = AnnotationSuggestion>) {
        for mut s in suggestions {
            if s.id == UNASSIGNED_ID {
                s.id = self.next_id();
            } else {
                self.reserve_above(s.id);
            }
            s.generation = self.generation;
            self.added += 1;
            self.documents
                .entry(s.document_name.clone())
                .or_default()
                .push(s);
        }
    }

    /// Carry ids over from `previous` for suggestions with the same identity.
    ///
    /// Matched suggestions take the old id, generation and `age + 1`. When
    /// several suggestions share a key only the first takes the old id.
    /// Everything else gets a fresh id from a counter above every id known to
    /// either instance, so ids are never reused within a document.
    pub fn inherit_suggestions(&mut self, previous: &Predictions) {
        let own_max = self.documents.values().flatten().map(|s| s.id).max();
        let previous_max = previous.documents.values().flatten().map(|s| s.id).max();
        self.reserve_above(previous.next_id - 1);
        for id in own_max.into_iter().chain(previous_max) {
            self.reserve_above(id);
        }

        let mut added = 0;
        let mut aged = 0;
        let mut removed = 0;
        let mut next_id = self.next_id;

        for (document, suggestions) in self.documents.iter_mut() {
            // Reverse insertion so the first predecessor per key wins.
            let mut old: HashMap<SuggestionKey, &AnnotationSuggestion> = HashMap::new();
            for s in previous.get_predictions_by_document(document).iter().rev() {
                old.insert(s.key(), s);
            }

            for s in suggestions.iter_mut() {
                match old.remove(&s.key()) {
                    Some(predecessor) => {
                        s.id = predecessor.id;
                        s.generation = predecessor.generation;
                        s.age = predecessor.age + 1;
                        aged += 1;
                    }
                    None => {
                        s.id = next_id;
                        next_id += 1;
                        added += 1;
                    }
                }
            }
            removed += old.len();
        }
        // Re-predicted documents that produced nothing this run.
        removed += previous
            .documents
            .iter()
            .filter(|(document, _)| {
                self.predicted_documents.contains(*document)
                    && !self.documents.contains_key(*document)
            })
            .map(|(_, suggestions)| suggestions.len())
            .sum::<usize>();

        self.next_id = next_id;
        self.added = added;
        self.aged = aged;
        self.removed = removed;
    }

    /// Copy the suggestions of every document `previous` holds that this run
    /// did not predict. Returns the number of documents carried over.
    pub fn inherit_documents(&mut self, previous: &Predictions) -> usize {
        let mut carried = 0;
        for (document, suggestions) in &previous.documents {
            if self.predicted_documents.contains(document) || self.documents.contains_key(document)
            {
                continue;
            }
            for s in suggestions {
                self.reserve_above(s.id);
            }
            self.documents.insert(document.clone(), suggestions.clone());
            carried += 1;
        }
        self.predicted_documents
            .extend(previous.predicted_documents.iter().cloned());
        carried
    }

    pub fn mark_document_as_predicted(&mut self, document_name: impl Into<String>) {
        self.predicted_documents.insert(document_name.into());
    }

    pub fn has_run_prediction_on_document(&self, document_name: &str) -> bool {
        self.predicted_documents.contains(document_name)
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn document_names(&self) -> impl Iterator<Item = &str> {
        self.documents.keys().map(String::as_str)
    }

    pub fn get_predictions_by_document(&self, document_name: &str) -> &[AnnotationSuggestion] {
        self.documents
            .get(document_name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Groups on `layer_id` in one document whose window overlaps `[begin, end)`.
    pub fn get_grouped_predictions(
        &self,
        document_name: &str,
        layer_id: i64,
        window: Offset,
    ) -> Vec<SuggestionGroup> {
        group_suggestions(
            self.get_predictions_by_document(document_name)
                .iter()
                .filter(|s| s.layer_id == layer_id)
                .filter(|s| s.position.window().overlaps(window.begin, window.end))
                .cloned(),
        )
    }

    /// Groups on `layer_id` across all documents.
    pub fn suggestions_for_layer(&self, layer_id: i64) -> Vec<SuggestionGroup> {
        group_suggestions(
            self.documents
                .values()
                .flatten()
                .filter(|s| s.layer_id == layer_id)
                .cloned(),
        )
    }

    pub fn iter(&self) -> impl Iterator<Item = &AnnotationSuggestion> {
        self.documents.values().flatten()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut AnnotationSuggestion> {
        self.documents.values_mut().flatten()
    }

    pub fn get(&self, document_name: &str, id: i32) -> Option<&AnnotationSuggestion> {
        self.documents.get(document_name)?.iter().find(|s| s.id == id)
    }

    pub fn get_mut(&mut self, document_name: &str, id: i32) -> Option<&mut AnnotationSuggestion> {
        self.documents
            .get_mut(document_name)?
            .iter_mut()
            .find(|s| s.id == id)
    }

    /// Drop every suggestion of one recommender. Returns how many were removed.
    pub fn remove_predictions_for_recommender(&mut self, recommender_id: i64) -> usize {
        let mut removed = 0;
        for suggestions in self.documents.values_mut() {
            let before = suggestions.len();
            suggestions.retain(|s| s.recommender_id != recommender_id);
            removed += before - suggestions.len();
        }
        self.documents.retain(|_, suggestions| !suggestions.is_empty());
        removed
    }

    // -------------------------------------------------------------------------
    // Log
    // -------------------------------------------------------------------------

    pub fn log_info(&mut self, source: impl Into<String>, message: impl Into<String>) {
        self.push_log(LogLevel::Info, source, message);
    }

    pub fn log_warn(&mut self, source: impl Into<String>, message: impl Into<String>) {
        self.push_log(LogLevel::Warn, source, message);
    }

    pub fn log_error(&mut self, source: impl Into<String>, message: impl Into<String>) {
        self.push_log(LogLevel::Error, source, message);
    }

    fn push_log(&mut self, level: LogLevel, source: impl Into<String>, message: impl Into<String>) {
        self.log.push(LogMessage {
            level,
            source: source.into(),
            message: message.into(),
        });
    }

    pub fn log(&self) -> &[LogMessage] {
        &self.log
    }
}

// =============================================================================
// STORE
// =============================================================================

type ScopeKey = (String, i64);

fn scope(user: &str, project_id: i64) -> ScopeKey {
    (user.to_string(), project_id)
}

/// Incoming and active predictions per (user, project).
#[derive(Debug, Default)]
pub struct PredictionStore {
    incoming: RwLock<HashMap<ScopeKey, Predictions>>,
    active: RwLock<HashMap<ScopeKey, Predictions>>,
}

impl PredictionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the incoming predictions of the pair the instance belongs to.
    pub async fn put_incoming(&self, predictions: Predictions) {
        let key = scope(predictions.user(), predictions.project_id());
        self.incoming.write().await.insert(key, predictions);
    }

    pub async fn incoming(&self, user: &str, project_id: i64) -> Option<Predictions> {
        self.incoming.read().await.get(&scope(user, project_id)).cloned()
    }

    pub async fn has_incoming(&self, user: &str, project_id: i64) -> bool {
        self.incoming
            .read()
            .await
            .contains_key(&scope(user, project_id))
    }

    pub async fn active(&self, user: &str, project_id: i64) -> Option<Predictions> {
        self.active.read().await.get(&scope(user, project_id)).cloned()
    }

    /// Predecessor for the next run: pending incoming, else active.
    pub async fn latest(&self, user: &str, project_id: i64) -> Option<Predictions> {
        match self.incoming(user, project_id).await {
            Some(p) => Some(p),
            None => self.active(user, project_id).await,
        }
    }

    /// Promote incoming to active. Returns false if nothing was pending.
    pub async fn switch(&self, user: &str, project_id: i64) -> bool {
        let key = scope(user, project_id);
        let Some(incoming) = self.incoming.write().await.remove(&key) else {
            return false;
        };
        self.active.write().await.insert(key, incoming);
        true
    }

    /// Run `f` against the active predictions, if any.
    pub async fn with_active<R>(
        &self,
        user: &str,
        project_id: i64,
        f: impl FnOnce(&mut Predictions) -> R,
    ) -> Option<R> {
        let mut active = self.active.write().await;
        active.get_mut(&scope(user, project_id)).map(f)
    }

    pub async fn clear(&self, user: &str, project_id: i64) {
        let key = scope(user, project_id);
        self.incoming.write().await.remove(&key);
        self.active.write().await.remove(&key);
    }

    /// Forget every user's predictions in a project.
    pub async fn clear_project(&self, project_id: i64) {
        self.incoming
            .write()
            .await
            .retain(|(_, project), _| *project != project_id);
        self.active
            .write()
            .await
            .retain(|(_, project), _| *project != project_id);
    }
}
