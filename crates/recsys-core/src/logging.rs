//! Structured logging schema and field name constants for recsys.
//!
//! All crates use these names for structured `tracing` fields so log
//! aggregation can query the pipeline consistently.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Engine failure, task failure, persistence failure |
//! | WARN  | Document or recommender excluded from a run |
//! | INFO  | Stage completions, activation decisions, configuration drift |
//! | DEBUG | Decision points (skips, lazy loads, dedup) |
//! | TRACE | Per-suggestion iteration |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "jobs", "active", "store"
pub const SUBSYSTEM: &str = "subsystem";

/// Logical operation name.
/// Examples: "select", "train", "predict", "inherit"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Username the pipeline runs for.
pub const USER: &str = "user";

/// Project id.
pub const PROJECT_ID: &str = "project_id";

/// Annotation layer id.
pub const LAYER_ID: &str = "layer_id";

/// Recommender id.
pub const RECOMMENDER_ID: &str = "recommender_id";

/// Recommender display name.
pub const RECOMMENDER: &str = "recommender";

/// Source document name.
pub const DOCUMENT: &str = "document";

/// Task UUID being processed.
pub const TASK_ID: &str = "task_id";

/// Task kind enum variant.
pub const TASK_KIND: &str = "task_kind";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Evaluation score (F1).
pub const SCORE: &str = "score";

/// Activation threshold.
pub const THRESHOLD: &str = "threshold";

/// Number of documents (CASes) involved.
pub const DOCUMENT_COUNT: &str = "document_count";

/// Number of suggestions involved.
pub const SUGGESTION_COUNT: &str = "suggestion_count";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

/// Reason an evaluation or step was skipped.
pub const REASON: &str = "reason";
