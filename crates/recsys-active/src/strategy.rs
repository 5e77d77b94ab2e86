//! Strategies picking the next suggestion to present to the annotator.

use tracing::trace;

use recsys_core::{Delta, Preferences, SuggestionGroup};

/// Picks one suggestion out of the candidate groups.
///
/// Implementations receive groups that were already deduplicated and passed
/// through the rejected/skipped hide pass.
pub trait ActiveLearningStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn next_suggestion(
        &self,
        groups: &[SuggestionGroup],
        preferences: &Preferences,
    ) -> Option<Delta>;
}

/// Uncertainty sampling: present the suggestion whose recommender is least
/// sure, i.e. the smallest gap between its best and second-best label.
///
/// Ties go to the earliest group (groups are ordered by document, then
/// position) and, within a group, to the lowest recommender id.
#[derive(Debug, Clone, Copy, Default)]
pub struct UncertaintySamplingStrategy;

impl UncertaintySamplingStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl ActiveLearningStrategy for UncertaintySamplingStrategy {
    fn name(&self) -> &str {
        "uncertainty-sampling"
    }

    fn next_suggestion(
        &self,
        groups: &[SuggestionGroup],
        preferences: &Preferences,
    ) -> Option<Delta> {
        let mut best: Option<Delta> = None;
        for group in groups {
            for (recommender_id, delta) in group.top_deltas(preferences) {
                trace!(recommender_id, delta = delta.delta, suggestion_id = delta.first.id,
                    "Candidate delta");
                // Strictly smaller only, so earlier candidates win ties.
                if best.as_ref().map_or(true, |b| delta.delta < b.delta) {
                    best = Some(delta);
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recsys_core::{group_suggestions, AnnotationSuggestion, HideFlags, Position};

    fn suggestion(
        id: i32,
        recommender: i64,
        begin: i32,
        label: &str,
        score: f64,
    ) -> AnnotationSuggestion {
        AnnotationSuggestion::new(
            recommender,
            format!("rec-{}", recommender),
            1,
            "value",
            "doc1",
            Position::span(begin, begin + 1),
            Some(label.to_string()),
            score,
        )
        .with_id(id)
    }

    #[test]
    fn test_picks_smallest_delta() {
        let groups = group_suggestions(vec![
            // Confident: 0.9 vs 0.1
            suggestion(1, 1, 0, "PER", 0.9),
            suggestion(2, 1, 0, "LOC", 0.1),
            // Uncertain: 0.5 vs 0.45
            suggestion(3, 1, 4, "PER", 0.5),
            suggestion(4, 1, 4, "LOC", 0.45),
        ]);

        let next = UncertaintySamplingStrategy::new()
            .next_suggestion(&groups, &Preferences::default())
            .unwrap();
        assert_eq!(next.first.id, 3);
        assert_eq!(next.second.as_ref().map(|s| s.id), Some(4));
        assert!((next.delta - 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_single_suggestion_delta_is_its_score() {
        let groups = group_suggestions(vec![
            suggestion(1, 1, 0, "PER", 0.8),
            suggestion(2, 2, 4, "LOC", 0.3),
        ]);

        let next = UncertaintySamplingStrategy::new()
            .next_suggestion(&groups, &Preferences::default())
            .unwrap();
        assert_eq!(next.first.id, 2);
        assert!(next.second.is_none());
    }

    #[test]
    fn test_hidden_suggestions_are_ignored_unless_requested() {
        let mut hidden = suggestion(1, 1, 0, "PER", 0.1);
        hidden.hide(HideFlags::REJECTED);
        let groups = group_suggestions(vec![hidden, suggestion(2, 1, 4, "LOC", 0.6)]);
        let strategy = UncertaintySamplingStrategy::new();

        let next = strategy
            .next_suggestion(&groups, &Preferences::default())
            .unwrap();
        assert_eq!(next.first.id, 2);

        let all = Preferences {
            show_all_predictions: true,
        };
        assert_eq!(strategy.next_suggestion(&groups, &all).unwrap().first.id, 1);
    }

    #[test]
    fn test_ties_keep_first_group() {
        let groups = group_suggestions(vec![
            suggestion(1, 1, 0, "PER", 0.5),
            suggestion(2, 1, 4, "PER", 0.5),
        ]);
        let next = UncertaintySamplingStrategy::new()
            .next_suggestion(&groups, &Preferences::default())
            .unwrap();
        assert_eq!(next.first.id, 1);
    }

    #[test]
    fn test_nothing_visible_yields_none() {
        let mut hidden = suggestion(1, 1, 0, "PER", 0.5);
        hidden.hide(HideFlags::SKIPPED);
        let groups = group_suggestions(vec![hidden]);
        assert!(UncertaintySamplingStrategy::new()
            .next_suggestion(&groups, &Preferences::default())
            .is_none());
        assert!(UncertaintySamplingStrategy::new()
            .next_suggestion(&[], &Preferences::default())
            .is_none());
    }
}
