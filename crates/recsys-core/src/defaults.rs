//! Centralized default constants for the recsys pipeline.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates reference these constants instead of defining their own magic
//! numbers. Organized by pipeline stage.

// =============================================================================
// EVALUATION
// =============================================================================

/// Fraction of the document pool used for training during selection.
pub const EVALUATION_TRAIN_FRACTION: f64 = 0.8;

/// Minimum test partition size; smaller partitions skip evaluation.
pub const EVALUATION_MIN_TEST_SIZE: usize = 10;

/// Training-set growth per learning-curve step (annotated instances).
pub const LEARNING_CURVE_STEP_SIZE: usize = 50;

/// Learning-curve steps with fewer training instances are skipped.
pub const LEARNING_CURVE_LOW_SAMPLE_THRESHOLD: usize = 10;

/// Default activation threshold (F1) for new recommenders.
pub const RECOMMENDER_THRESHOLD: f64 = 0.0;

/// Default number of suggestions kept per recommender and position.
pub const MAX_RECOMMENDATIONS: usize = 3;

// =============================================================================
// TASKS
// =============================================================================

/// Polling interval for the task worker when the queue is empty (ms).
pub const TASK_POLL_INTERVAL_MS: u64 = 1_000;

/// Maximum number of tasks processed concurrently.
pub const TASK_MAX_CONCURRENT: usize = 4;

/// Hard timeout for a single task (seconds).
pub const TASK_TIMEOUT_SECS: u64 = 1_800;

// =============================================================================
// EVENTS
// =============================================================================

/// Broadcast buffer for the event bus and worker events.
pub const EVENT_BUS_CAPACITY: usize = 256;
