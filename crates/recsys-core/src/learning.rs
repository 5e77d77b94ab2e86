//! Learning records: the append-only history of user decisions on suggestions.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::suggestion::{AnnotationSuggestion, HideFlags, Position};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserAction {
    Accepted,
    Rejected,
    Skipped,
    Corrected,
    Shown,
}

/// Where in the UI the decision was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeLocation {
    MainEditor,
    ActiveLearningSidebar,
    RecommenderSidebar,
    AutoAccept,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningRecord {
    /// Assigned by the repository; `0` until stored.
    pub id: i64,
    pub user: String,
    pub project_id: i64,
    pub document_name: String,
    pub layer_id: i64,
    pub feature: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommender_id: Option<i64>,
    pub position: Position,
    pub label: Option<String>,
    pub action: UserAction,
    pub location: ChangeLocation,
    pub created_at: DateTime<Utc>,
}

impl LearningRecord {
    /// Record a decision taken on `suggestion`.
    pub fn from_suggestion(
        user: impl Into<String>,
        project_id: i64,
        suggestion: &AnnotationSuggestion,
        action: UserAction,
        location: ChangeLocation,
    ) -> Self {
        Self {
            id: 0,
            user: user.into(),
            project_id,
            document_name: suggestion.document_name.clone(),
            layer_id: suggestion.layer_id,
            feature: suggestion.feature.clone(),
            recommender_id: Some(suggestion.recommender_id),
            position: suggestion.position,
            label: suggestion.label.clone(),
            action,
            location,
            created_at: Utc::now(),
        }
    }

    pub fn with_label(mut self, label: Option<String>) -> Self {
        self.label = label;
        self
    }

    /// Whether this record describes the same slot and label as `suggestion`.
    pub fn matches(&self, suggestion: &AnnotationSuggestion) -> bool {
        self.document_name == suggestion.document_name
            && self.layer_id == suggestion.layer_id
            && self.feature == suggestion.feature
            && self.position == suggestion.position
            && self.label == suggestion.label
    }
}

type RecordKey<'a> = (&'a str, i64, &'a str, Position, Option<&'a str>);

/// Hide visible suggestions that the user rejected (and, with
/// `filter_skipped`, skipped) before. Already hidden suggestions are not
/// touched. Returns the number of suggestions newly hidden.
pub fn hide_rejected_or_skipped<'s>(
    records: &[LearningRecord],
    suggestions: impl IntoIterator<Item = &'s mut AnnotationSuggestion>,
    filter_skipped: bool,
) -> usize {
    let mut decisions: HashMap<RecordKey<'_>, (bool, bool)> = HashMap::new();
    for r in records {
        let entry = decisions
            .entry((
                r.document_name.as_str(),
                r.layer_id,
                r.feature.as_str(),
                r.position,
                r.label.as_deref(),
            ))
            .or_default();
        match r.action {
            UserAction::Rejected => entry.0 = true,
            UserAction::Skipped => entry.1 = true,
            _ => {}
        }
    }

    let mut hidden = 0;
    for s in suggestions {
        if !s.is_visible() {
            continue;
        }
        let key = (
            s.document_name.as_str(),
            s.layer_id,
            s.feature.as_str(),
            s.position,
            s.label.as_deref(),
        );
        let Some(&(rejected, skipped)) = decisions.get(&key) else {
            continue;
        };
        if rejected {
            s.hide(HideFlags::REJECTED);
            hidden += 1;
        } else if skipped && filter_skipped {
            s.hide(HideFlags::SKIPPED);
            hidden += 1;
        }
    }
    hidden
}
