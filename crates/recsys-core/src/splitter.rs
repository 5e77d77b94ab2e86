//! Deterministic train/test partitioning for recommender evaluation.
//!
//! Two strategies:
//!
//! - [`PercentageBasedSplitter`]: one split, used by the selection stage.
//! - [`IncrementalSplitter`]: an iterator of [`IncrementalStep`]s whose training
//!   partition grows step by step, used to build learning curves.
//!
//! Splits never shuffle. The same input order always yields the same partitions.

use serde::{Deserialize, Serialize};

use crate::evaluation::EvaluationResult;

/// Guards float rounding in `n * fraction` (e.g. `60 * 0.8`).
const FRACTION_EPSILON: f64 = 1e-9;

fn fraction_of(n: usize, fraction: f64) -> usize {
    let scaled = (n as f64 * fraction.clamp(0.0, 1.0) + FRACTION_EPSILON).floor();
    (scaled as usize).min(n)
}

/// A training/test partition.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSplit<T> {
    pub training: Vec<T>,
    pub test: Vec<T>,
}

/// The pool cannot be split usefully; evaluation should be skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitSkipped {
    pub reason: String,
}

impl SplitSkipped {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Convert into a skipped evaluation result carrying the reason.
    pub fn into_evaluation_result(self) -> EvaluationResult {
        EvaluationResult::skipped(self.reason)
    }
}

/// Single-shot split: the first `train_fraction` of the pool trains, the rest tests.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PercentageBasedSplitter {
    pub train_fraction: f64,
    pub min_test_size: usize,
}

impl PercentageBasedSplitter {
    pub fn new(train_fraction: f64, min_test_size: usize) -> Self {
        Self {
            train_fraction,
            min_test_size,
        }
    }

    pub fn split<T: Clone>(&self, pool: &[T]) -> Result<DataSplit<T>, SplitSkipped> {
        let train_size = fraction_of(pool.len(), self.train_fraction);
        let (training, test) = pool.split_at(train_size);

        if test.len() < self.min_test_size {
            return Err(SplitSkipped::new(format!(
                "Test set too small: {} < {} (pool size {})",
                test.len(),
                self.min_test_size,
                pool.len()
            )));
        }

        Ok(DataSplit {
            training: training.to_vec(),
            test: test.to_vec(),
        })
    }
}

impl Default for PercentageBasedSplitter {
    fn default() -> Self {
        Self::new(
            crate::defaults::EVALUATION_TRAIN_FRACTION,
            crate::defaults::EVALUATION_MIN_TEST_SIZE,
        )
    }
}

/// Learning-curve splitter.
///
/// Iterating yields one [`IncrementalStep`] per training-set size: `step_size`,
/// `2 * step_size`, ... capped at `train_fraction * estimated_size`. The test
/// partition is the fixed tail beyond that cap. Steps below
/// `low_sample_threshold` are not yielded.
#[derive(Debug, Clone, PartialEq)]
pub struct IncrementalSplitter {
    pub train_fraction: f64,
    pub step_size: usize,
    pub low_sample_threshold: usize,
    estimated_size: usize,
    limit: usize,
    exhausted: bool,
}

impl IncrementalSplitter {
    pub fn new(train_fraction: f64, step_size: usize, low_sample_threshold: usize) -> Self {
        Self {
            train_fraction,
            step_size: step_size.max(1),
            low_sample_threshold,
            estimated_size: 0,
            limit: 0,
            exhausted: false,
        }
    }

    /// Set the estimated number of annotated instances in the pool.
    pub fn with_estimated_size(mut self, estimated_size: usize) -> Self {
        self.estimated_size = estimated_size;
        self
    }

    pub fn estimated_size(&self) -> usize {
        self.estimated_size
    }

    /// Upper bound of the training partition.
    pub fn max_training_size(&self) -> usize {
        fraction_of(self.estimated_size, self.train_fraction)
    }
}

impl Default for IncrementalSplitter {
    fn default() -> Self {
        Self::new(
            crate::defaults::EVALUATION_TRAIN_FRACTION,
            crate::defaults::LEARNING_CURVE_STEP_SIZE,
            crate::defaults::LEARNING_CURVE_LOW_SAMPLE_THRESHOLD,
        )
    }
}

impl Iterator for IncrementalSplitter {
    type Item = IncrementalStep;

    fn next(&mut self) -> Option<Self::Item> {
        let max = self.max_training_size();
        while !self.exhausted {
            self.limit = (self.limit + self.step_size).min(max);
            if self.limit >= max {
                self.exhausted = true;
            }
            if self.limit == 0 || self.limit < self.low_sample_threshold {
                continue;
            }
            return Some(IncrementalStep {
                training_limit: self.limit,
                test_start: max,
                low_sample_threshold: self.low_sample_threshold,
            });
        }
        None
    }
}

/// One step of an [`IncrementalSplitter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncrementalStep {
    /// Number of instances in the training partition.
    pub training_limit: usize,
    /// Index where the fixed test partition begins.
    pub test_start: usize,
    pub low_sample_threshold: usize,
}

impl IncrementalStep {
    pub fn split<T: Clone>(&self, pool: &[T]) -> Result<DataSplit<T>, SplitSkipped> {
        let test_start = self.test_start.min(pool.len());
        let training_end = self.training_limit.min(test_start);
        let training = &pool[..training_end];
        let test = &pool[test_start..];

        if training.len() < self.low_sample_threshold {
            return Err(SplitSkipped::new(format!(
                "Training set below low-sample threshold: {} < {}",
                training.len(),
                self.low_sample_threshold
            )));
        }
        if test.is_empty() {
            return Err(SplitSkipped::new("Test set is empty"));
        }

        Ok(DataSplit {
            training: training.to_vec(),
            test: test.to_vec(),
        })
    }
}

/// Partitioning strategy handed to an engine's `evaluate`.
#[derive(Debug, Clone, PartialEq)]
pub enum DataSplitter {
    Percentage(PercentageBasedSplitter),
    Incremental(IncrementalStep),
}

impl DataSplitter {
    pub fn split<T: Clone>(&self, pool: &[T]) -> Result<DataSplit<T>, SplitSkipped> {
        match self {
            DataSplitter::Percentage(s) => s.split(pool),
            DataSplitter::Incremental(s) => s.split(pool),
        }
    }
}
