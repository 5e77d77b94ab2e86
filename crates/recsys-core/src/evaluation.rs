//! Evaluation results produced by recommendation engines.
//!
//! Engines collect (gold, predicted) label pairs over the test partition into
//! a [`ConfusionMatrix`]. [`EvaluationResult`] derives the standard metrics
//! from it: accuracy over all pairs and macro-averaged precision/recall over
//! the non-ignored labels. F1 combines the two averages.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Counts of (gold, predicted) label pairs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    /// gold label -> predicted label -> count
    counts: BTreeMap<String, BTreeMap<String, u64>>,
}

impl ConfusionMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one (gold, predicted) pair.
    pub fn increment(&mut self, gold: &str, predicted: &str) {
        self.add(gold, predicted, 1);
    }

    /// Record `count` (gold, predicted) pairs.
    pub fn add(&mut self, gold: &str, predicted: &str, count: u64) {
        *self
            .counts
            .entry(gold.to_string())
            .or_default()
            .entry(predicted.to_string())
            .or_insert(0) += count;
    }

    /// Every label seen as gold or predicted.
    pub fn labels(&self) -> BTreeSet<&str> {
        let mut labels = BTreeSet::new();
        for (gold, row) in &self.counts {
            labels.insert(gold.as_str());
            labels.extend(row.keys().map(String::as_str));
        }
        labels
    }

    pub fn count(&self, gold: &str, predicted: &str) -> u64 {
        self.counts
            .get(gold)
            .and_then(|row| row.get(predicted))
            .copied()
            .unwrap_or(0)
    }

    pub fn true_positives(&self, label: &str) -> u64 {
        self.count(label, label)
    }

    /// Number of pairs whose gold label is `label`.
    pub fn gold_total(&self, label: &str) -> u64 {
        self.counts
            .get(label)
            .map(|row| row.values().sum())
            .unwrap_or(0)
    }

    /// Number of pairs whose predicted label is `label`.
    pub fn predicted_total(&self, label: &str) -> u64 {
        self.counts
            .values()
            .filter_map(|row| row.get(label))
            .sum()
    }

    pub fn total(&self) -> u64 {
        self.counts.values().flat_map(|row| row.values()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Outcome of evaluating one recommender.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    confusion: ConfusionMatrix,
    ignored_labels: BTreeSet<String>,
    pub training_set_size: usize,
    pub test_set_size: usize,
    /// Fraction of the available training data used.
    pub training_data_ratio: f64,
    skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    skip_reason: Option<String>,
}

impl EvaluationResult {
    pub fn new(confusion: ConfusionMatrix) -> Self {
        Self {
            confusion,
            training_data_ratio: 1.0,
            ..Self::default()
        }
    }

    /// Build a result from (gold, predicted) pairs.
    pub fn from_label_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut confusion = ConfusionMatrix::new();
        for (gold, predicted) in pairs {
            confusion.increment(gold, predicted);
        }
        Self::new(confusion)
    }

    /// A result signalling that evaluation did not take place.
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            skipped: true,
            skip_reason: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn with_set_sizes(mut self, training: usize, test: usize) -> Self {
        self.training_set_size = training;
        self.test_set_size = test;
        self
    }

    pub fn with_training_data_ratio(mut self, ratio: f64) -> Self {
        self.training_data_ratio = ratio;
        self
    }

    /// Labels excluded from the macro averages (e.g. an "outside" tag).
    pub fn with_ignored_labels(mut self, labels: impl IntoIterator<Item = String>) -> Self {
        self.ignored_labels = labels.into_iter().collect();
        self
    }

    pub fn is_skipped(&self) -> bool {
        self.skipped
    }

    pub fn skip_reason(&self) -> Option<&str> {
        self.skip_reason.as_deref()
    }

    pub fn confusion_matrix(&self) -> &ConfusionMatrix {
        &self.confusion
    }

    fn evaluated_labels(&self) -> Vec<&str> {
        self.confusion
            .labels()
            .into_iter()
            .filter(|l| !self.ignored_labels.contains(*l))
            .collect()
    }

    /// Share of correctly predicted pairs among pairs with a non-ignored gold label.
    pub fn accuracy(&self) -> f64 {
        let labels = self.evaluated_labels();
        let total: u64 = labels.iter().map(|l| self.confusion.gold_total(l)).sum();
        if total == 0 {
            return 0.0;
        }
        let correct: u64 = labels
            .iter()
            .map(|l| self.confusion.true_positives(l))
            .sum();
        correct as f64 / total as f64
    }

    /// Macro-averaged precision.
    pub fn precision(&self) -> f64 {
        self.macro_average(|c, l| c.predicted_total(l))
    }

    /// Macro-averaged recall.
    pub fn recall(&self) -> f64 {
        self.macro_average(|c, l| c.gold_total(l))
    }

    /// `2PR / (P + R)`, or `0` when `P + R = 0`.
    pub fn f1_score(&self) -> f64 {
        f1(self.precision(), self.recall())
    }

    fn macro_average(&self, denominator: impl Fn(&ConfusionMatrix, &str) -> u64) -> f64 {
        let labels = self.evaluated_labels();
        if labels.is_empty() {
            return 0.0;
        }
        let sum: f64 = labels
            .iter()
            .map(|l| {
                let denom = denominator(&self.confusion, l);
                if denom == 0 {
                    0.0
                } else {
                    self.confusion.true_positives(l) as f64 / denom as f64
                }
            })
            .sum();
        sum / labels.len() as f64
    }
}

/// Harmonic mean of precision and recall.
pub fn f1(precision: f64, recall: f64) -> f64 {
    if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    }
}
