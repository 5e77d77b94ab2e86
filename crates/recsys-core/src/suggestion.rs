//! Annotation suggestions and suggestion groups.
//!
//! A suggestion is one candidate annotation proposed by a recommender. The
//! shared fields live on [`AnnotationSuggestion`]; what differs between span
//! and relation suggestions is only the [`Position`] payload.
//!
//! Suggestions competing for the same position form a [`SuggestionGroup`],
//! which keeps them ordered by descending score.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Id of a suggestion that has not been registered with a `Predictions` yet.
pub const UNASSIGNED_ID: i32 = -1;

// =============================================================================
// POSITIONS
// =============================================================================

/// Half-open character range `[begin, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Offset {
    pub begin: i32,
    pub end: i32,
}

impl Offset {
    pub fn new(begin: i32, end: i32) -> Self {
        Self { begin, end }
    }

    pub fn overlaps(&self, begin: i32, end: i32) -> bool {
        self.begin < end && begin < self.end
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.begin, self.end)
    }
}

/// Where a suggestion sits in its document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Position {
    Span(Offset),
    Relation { source: Offset, target: Offset },
}

impl Position {
    pub fn span(begin: i32, end: i32) -> Self {
        Position::Span(Offset::new(begin, end))
    }

    pub fn relation(source: Offset, target: Offset) -> Self {
        Position::Relation { source, target }
    }

    pub fn kind(&self) -> SuggestionKind {
        match self {
            Position::Span(_) => SuggestionKind::Span,
            Position::Relation { .. } => SuggestionKind::Relation,
        }
    }

    /// Character window the position occupies (relations: the source span).
    pub fn window(&self) -> Offset {
        match self {
            Position::Span(offset) => *offset,
            Position::Relation { source, .. } => *source,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::Span(offset) => write!(f, "{}", offset),
            Position::Relation { source, target } => write!(f, "{} -> {}", source, target),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionKind {
    Span,
    Relation,
}

// =============================================================================
// FLAGS & MODES
// =============================================================================

/// Reasons a suggestion is hidden. A suggestion with no flag set is visible.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HideFlags(u32);

impl HideFlags {
    /// An annotation with the same label already exists at the position.
    pub const OVERLAP: HideFlags = HideFlags(1);
    pub const SKIPPED: HideFlags = HideFlags(1 << 1);
    pub const REJECTED: HideFlags = HideFlags(1 << 2);
    pub const TRANSIENT_ACCEPTED: HideFlags = HideFlags(1 << 3);
    pub const TRANSIENT_REJECTED: HideFlags = HideFlags(1 << 4);
    pub const TRANSIENT_CORRECTED: HideFlags = HideFlags(1 << 5);

    pub const NONE: HideFlags = HideFlags(0);

    pub fn contains(self, other: HideFlags) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn insert(&mut self, other: HideFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: HideFlags) {
        self.0 &= !other.0;
    }

    /// Human-readable names of the set flags.
    pub fn reasons(self) -> Vec<&'static str> {
        [
            (Self::OVERLAP, "overlaps with annotation"),
            (Self::SKIPPED, "skipped"),
            (Self::REJECTED, "rejected"),
            (Self::TRANSIENT_ACCEPTED, "accepted"),
            (Self::TRANSIENT_REJECTED, "rejected (transient)"),
            (Self::TRANSIENT_CORRECTED, "corrected"),
        ]
        .into_iter()
        .filter(|(flag, _)| self.contains(*flag))
        .map(|(_, reason)| reason)
        .collect()
    }
}

impl std::ops::BitOr for HideFlags {
    type Output = HideFlags;

    fn bitor(self, rhs: HideFlags) -> HideFlags {
        HideFlags(self.0 | rhs.0)
    }
}

/// Whether a suggestion is turned into an annotation without user action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoAcceptMode {
    #[default]
    Never,
    /// Accept when the user first opens the document.
    OnFirstAccess,
}

// =============================================================================
// SUGGESTION
// =============================================================================

/// Identity of a suggestion across prediction runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SuggestionKey {
    pub document_name: String,
    pub recommender_id: i64,
    pub position: Position,
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationSuggestion {
    /// Numeric id, unique per document within one `Predictions`.
    pub id: i32,
    /// Generation of the `Predictions` that first produced this suggestion.
    pub generation: i32,
    /// Number of consecutive runs this suggestion survived.
    pub age: i32,
    pub recommender_id: i64,
    pub recommender_name: String,
    pub layer_id: i64,
    pub feature: String,
    pub document_name: String,
    pub label: Option<String>,
    pub ui_label: String,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_explanation: Option<String>,
    pub position: Position,
    pub auto_accept: AutoAcceptMode,
    hiding_flags: HideFlags,
}

impl AnnotationSuggestion {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        recommender_id: i64,
        recommender_name: impl Into<String>,
        layer_id: i64,
        feature: impl Into<String>,
        document_name: impl Into<String>,
        position: Position,
        label: Option<String>,
        score: f64,
    ) -> Self {
        let ui_label = label.clone().unwrap_or_default();
        Self {
            id: UNASSIGNED_ID,
            generation: 0,
            age: 0,
            recommender_id,
            recommender_name: recommender_name.into(),
            layer_id,
            feature: feature.into(),
            document_name: document_name.into(),
            label,
            ui_label,
            score,
            score_explanation: None,
            position,
            auto_accept: AutoAcceptMode::Never,
            hiding_flags: HideFlags::NONE,
        }
    }

    pub fn with_id(mut self, id: i32) -> Self {
        self.id = id;
        self
    }

    pub fn with_generation(mut self, generation: i32) -> Self {
        self.generation = generation;
        self
    }

    pub fn with_age(mut self, age: i32) -> Self {
        self.age = age;
        self
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = score;
        self
    }

    pub fn with_score_explanation(mut self, explanation: Option<String>) -> Self {
        self.score_explanation = explanation;
        self
    }

    pub fn with_ui_label(mut self, ui_label: impl Into<String>) -> Self {
        self.ui_label = ui_label.into();
        self
    }

    pub fn with_auto_accept(mut self, mode: AutoAcceptMode) -> Self {
        self.auto_accept = mode;
        self
    }

    pub fn kind(&self) -> SuggestionKind {
        self.position.kind()
    }

    pub fn key(&self) -> SuggestionKey {
        SuggestionKey {
            document_name: self.document_name.clone(),
            recommender_id: self.recommender_id,
            position: self.position,
            label: self.label.clone(),
        }
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn is_visible(&self) -> bool {
        self.hiding_flags.is_empty()
    }

    pub fn hiding_flags(&self) -> HideFlags {
        self.hiding_flags
    }

    pub fn hide(&mut self, flag: HideFlags) {
        self.hiding_flags.insert(flag);
    }

    pub fn show(&mut self, flag: HideFlags) {
        self.hiding_flags.remove(flag);
    }

    /// Whether this and `other` compete for the same slot.
    pub fn same_slot(&self, other: &AnnotationSuggestion) -> bool {
        self.document_name == other.document_name
            && self.layer_id == other.layer_id
            && self.feature == other.feature
            && self.position == other.position
    }
}

// =============================================================================
// GROUPS
// =============================================================================

/// Preferences influencing which suggestions are considered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    /// Include hidden suggestions when computing deltas.
    pub show_all_predictions: bool,
}

/// Best suggestion of one recommender in a group and its margin over the runner-up.
#[derive(Debug, Clone, PartialEq)]
pub struct Delta {
    pub first: AnnotationSuggestion,
    pub second: Option<AnnotationSuggestion>,
    pub delta: f64,
}

impl Delta {
    fn new(first: AnnotationSuggestion, second: Option<AnnotationSuggestion>) -> Self {
        let delta = match &second {
            Some(s) => first.score - s.score,
            None => first.score,
        };
        Self {
            first,
            second,
            delta,
        }
    }
}

/// Suggestions for one position, ordered by descending score.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SuggestionGroup {
    suggestions: Vec<AnnotationSuggestion>,
}

impl SuggestionGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_suggestions(
        suggestions: impl IntoIterator<Item = AnnotationSuggestion>,
    ) -> Result<Self> {
        let mut group = Self::new();
        for s in suggestions {
            group.add(s)?;
        }
        Ok(group)
    }

    /// Insert keeping descending score order; equal scores keep insertion order.
    pub fn add(&mut self, suggestion: AnnotationSuggestion) -> Result<()> {
        if let Some(first) = self.suggestions.first() {
            if !first.same_slot(&suggestion) {
                return Err(Error::InvalidInput(format!(
                    "Suggestion at {} in '{}' does not belong to group at {} in '{}'",
                    suggestion.position,
                    suggestion.document_name,
                    first.position,
                    first.document_name
                )));
            }
        }
        self.insert_sorted(suggestion);
        Ok(())
    }

    fn insert_sorted(&mut self, suggestion: AnnotationSuggestion) {
        let idx = self
            .suggestions
            .iter()
            .position(|s| s.score < suggestion.score)
            .unwrap_or(self.suggestions.len());
        self.suggestions.insert(idx, suggestion);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, AnnotationSuggestion> {
        self.suggestions.iter()
    }

    /// Mutable access; scores must not be changed through this.
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, AnnotationSuggestion> {
        self.suggestions.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.suggestions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.suggestions.is_empty()
    }

    pub fn best(&self) -> Option<&AnnotationSuggestion> {
        self.suggestions.first()
    }

    pub fn position(&self) -> Option<Position> {
        self.best().map(|s| s.position)
    }

    pub fn document_name(&self) -> Option<&str> {
        self.best().map(|s| s.document_name.as_str())
    }

    pub fn layer_id(&self) -> Option<i64> {
        self.best().map(|s| s.layer_id)
    }

    pub fn kind(&self) -> Option<SuggestionKind> {
        self.best().map(|s| s.kind())
    }

    /// At least one suggestion is visible.
    pub fn is_visible(&self) -> bool {
        self.suggestions.iter().any(|s| s.is_visible())
    }

    pub fn get(&self, id: i32) -> Option<&AnnotationSuggestion> {
        self.suggestions.iter().find(|s| s.id == id)
    }

    pub fn get_mut(&mut self, id: i32) -> Option<&mut AnnotationSuggestion> {
        self.suggestions.iter_mut().find(|s| s.id == id)
    }

    /// Keep only the suggestions for which `keep` holds.
    pub fn retain(&mut self, keep: impl FnMut(&AnnotationSuggestion) -> bool) {
        self.suggestions.retain(keep);
    }

    /// Per recommender: best suggestion, runner-up, and the gap between them.
    ///
    /// Hidden suggestions are ignored unless `show_all_predictions` is set.
    pub fn top_deltas(&self, preferences: &Preferences) -> BTreeMap<i64, Delta> {
        let mut firsts: BTreeMap<i64, (&AnnotationSuggestion, Option<&AnnotationSuggestion>)> =
            BTreeMap::new();
        for s in &self.suggestions {
            if !s.is_visible() && !preferences.show_all_predictions {
                continue;
            }
            match firsts.get_mut(&s.recommender_id) {
                None => {
                    firsts.insert(s.recommender_id, (s, None));
                }
                Some(entry) => {
                    if entry.1.is_none() {
                        entry.1 = Some(s);
                    }
                }
            }
        }
        firsts
            .into_iter()
            .map(|(id, (first, second))| (id, Delta::new(first.clone(), second.cloned())))
            .collect()
    }
}

impl IntoIterator for SuggestionGroup {
    type Item = AnnotationSuggestion;
    type IntoIter = std::vec::IntoIter<AnnotationSuggestion>;

    fn into_iter(self) -> Self::IntoIter {
        self.suggestions.into_iter()
    }
}

impl<'a> IntoIterator for &'a SuggestionGroup {
    type Item = &'a AnnotationSuggestion;
    type IntoIter = std::slice::Iter<'a, AnnotationSuggestion>;

    fn into_iter(self) -> Self::IntoIter {
        self.suggestions.iter()
    }
}

/// Group suggestions by (document, layer, feature, position).
///
/// Groups come out ordered by document name, then position.
pub fn group_suggestions(
    suggestions: impl IntoIterator<Item = AnnotationSuggestion>,
) -> Vec<SuggestionGroup> {
    let mut groups: BTreeMap<(String, i64, String, Position), SuggestionGroup> = BTreeMap::new();
    for s in suggestions {
        groups
            .entry((s.document_name.clone(), s.layer_id, s.feature.clone(), s.position))
            .or_default()
            .insert_sorted(s);
    }
    groups.into_values().collect()
}
