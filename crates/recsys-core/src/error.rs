//! Error types for recsys.

use thiserror::Error;

/// Result type alias using recsys's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for recsys operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Persistence backend failed or is unavailable
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Recommender was deleted (possibly concurrently)
    #[error("Recommender not found: {0}")]
    RecommenderNotFound(i64),

    /// Annotation layer not found
    #[error("Layer not found: {0}")]
    LayerNotFound(i64),

    /// Source document not found
    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    /// Reading or writing an annotation CAS failed
    #[error("CAS error: {0}")]
    Cas(String),

    /// A recommendation engine failed during train/predict/evaluate
    #[error("Engine error: {0}")]
    Engine(String),

    /// Recommender context misuse (e.g. write after close)
    #[error("Context error: {0}")]
    Context(String),

    /// Task queue error
    #[error("Task error: {0}")]
    Task(String),

    /// The running task was cancelled
    #[error("Task cancelled")]
    Cancelled,

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
