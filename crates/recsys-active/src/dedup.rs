//! Duplicate removal for suggestion groups.
//!
//! Prediction runs can yield the same suggestion more than once, e.g. when a
//! document was predicted again before the previous results were switched
//! out. Two suggestions are duplicates when they come from the same
//! recommender and carry the same label at the same position of the same
//! document. Suggestions differing in recommender or label stay distinct.

use std::collections::HashSet;

use tracing::debug;

use recsys_core::SuggestionGroup;

/// Keep one suggestion per (recommender, label) in each group.
///
/// A group already covers a single document and position, so the key only
/// needs the recommender and the label. The first suggestion in group order
/// (highest score) is kept. Groups left empty are dropped.
pub fn remove_duplicate_recommendations(groups: Vec<SuggestionGroup>) -> Vec<SuggestionGroup> {
    let mut removed = 0;
    let deduplicated: Vec<SuggestionGroup> = groups
        .into_iter()
        .filter_map(|mut group| {
            let before = group.len();
            let mut seen: HashSet<(i64, Option<String>)> = HashSet::new();
            group.retain(|s| seen.insert((s.recommender_id, s.label.clone())));
            removed += before - group.len();
            (!group.is_empty()).then_some(group)
        })
        .collect();

    if removed > 0 {
        debug!(removed, "Removed duplicate suggestions");
    }
    deduplicated
}

#[cfg(test)]
mod tests {
    use super::*;
    use recsys_core::{group_suggestions, AnnotationSuggestion, Position};

    fn suggestion(id: i32, recommender: i64, label: &str, score: f64) -> AnnotationSuggestion {
        AnnotationSuggestion::new(
            recommender,
            format!("rec-{}", recommender),
            1,
            "value",
            "doc1",
            Position::span(0, 4),
            Some(label.to_string()),
            score,
        )
        .with_id(id)
    }

    #[test]
    fn test_same_recommender_label_document_collapses() {
        let groups = group_suggestions(vec![
            suggestion(1, 1, "PER", 0.4),
            suggestion(2, 1, "PER", 0.7),
        ]);

        let out = remove_duplicate_recommendations(groups);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].len(), 1);
        // The higher-scored copy comes first and survives.
        assert_eq!(out[0].best().unwrap().id, 2);
    }

    #[test]
    fn test_different_recommender_or_label_is_kept() {
        let groups = group_suggestions(vec![
            suggestion(1, 1, "PER", 0.4),
            suggestion(2, 2, "PER", 0.4),
            suggestion(3, 1, "LOC", 0.4),
        ]);

        let out = remove_duplicate_recommendations(groups);
        assert_eq!(out[0].len(), 3);
    }

    #[test]
    fn test_same_label_in_other_document_is_kept() {
        let mut other = suggestion(1, 1, "PER", 0.4);
        other.document_name = "doc2".to_string();
        let groups = group_suggestions(vec![suggestion(1, 1, "PER", 0.4), other]);

        let out = remove_duplicate_recommendations(groups);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|g| g.len() == 1));
    }
}
