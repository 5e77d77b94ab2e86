//! Evaluation settings for the pipeline.

use recsys_core::defaults;
use recsys_core::{DataSplitter, IncrementalSplitter, PercentageBasedSplitter};

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Share of annotated instances used for training during evaluation.
    pub train_fraction: f64,
    /// Evaluations with a smaller test partition are skipped.
    pub min_test_size: usize,
    pub curve_step_size: usize,
    pub curve_low_sample_threshold: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            train_fraction: defaults::EVALUATION_TRAIN_FRACTION,
            min_test_size: defaults::EVALUATION_MIN_TEST_SIZE,
            curve_step_size: defaults::LEARNING_CURVE_STEP_SIZE,
            curve_low_sample_threshold: defaults::LEARNING_CURVE_LOW_SAMPLE_THRESHOLD,
        }
    }
}

impl PipelineConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `RECSYS_EVAL_TRAIN_FRACTION` | `0.8` | Training share during selection |
    /// | `RECSYS_EVAL_MIN_TEST_SIZE` | `10` | Minimum test partition |
    /// | `RECSYS_CURVE_STEP_SIZE` | `50` | Learning-curve step |
    /// | `RECSYS_CURVE_LOW_SAMPLE_THRESHOLD` | `10` | Smallest learning-curve step |
    pub fn from_env() -> Self {
        let train_fraction = std::env::var("RECSYS_EVAL_TRAIN_FRACTION")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|f| *f > 0.0 && *f < 1.0)
            .unwrap_or(defaults::EVALUATION_TRAIN_FRACTION);

        let min_test_size = env_usize("RECSYS_EVAL_MIN_TEST_SIZE")
            .unwrap_or(defaults::EVALUATION_MIN_TEST_SIZE);

        let curve_step_size = env_usize("RECSYS_CURVE_STEP_SIZE")
            .unwrap_or(defaults::LEARNING_CURVE_STEP_SIZE)
            .max(1);

        let curve_low_sample_threshold = env_usize("RECSYS_CURVE_LOW_SAMPLE_THRESHOLD")
            .unwrap_or(defaults::LEARNING_CURVE_LOW_SAMPLE_THRESHOLD);

        Self {
            train_fraction,
            min_test_size,
            curve_step_size,
            curve_low_sample_threshold,
        }
    }

    pub fn with_train_fraction(mut self, fraction: f64) -> Self {
        self.train_fraction = fraction;
        self
    }

    pub fn with_min_test_size(mut self, size: usize) -> Self {
        self.min_test_size = size;
        self
    }

    pub fn with_curve_step_size(mut self, size: usize) -> Self {
        self.curve_step_size = size;
        self
    }

    pub fn with_curve_low_sample_threshold(mut self, threshold: usize) -> Self {
        self.curve_low_sample_threshold = threshold;
        self
    }

    /// Splitter used by the selection stage.
    pub fn selection_splitter(&self) -> DataSplitter {
        DataSplitter::Percentage(PercentageBasedSplitter::new(
            self.train_fraction,
            self.min_test_size,
        ))
    }

    /// Splitter for a learning curve over `estimated_size` instances.
    pub fn curve_splitter(&self, estimated_size: usize) -> IncrementalSplitter {
        IncrementalSplitter::new(
            self.train_fraction,
            self.curve_step_size,
            self.curve_low_sample_threshold,
        )
        .with_estimated_size(estimated_size)
    }
}

fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name).ok().and_then(|v| v.parse::<usize>().ok())
}
