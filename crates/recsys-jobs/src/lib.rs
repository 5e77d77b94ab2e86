//! # recsys-jobs
//!
//! Background pipeline that keeps annotation suggestions up to date.
//!
//! This crate provides:
//! - Selection, training and prediction tasks chained through a coalescing
//!   [`TaskQueue`]
//! - A [`TaskWorker`] running tasks concurrently with per-task timeouts
//! - The engine factory [`EngineRegistry`]
//! - The suggestion computation routine and learning curves on
//!   [`RecommendationService`]
//!
//! ## Example
//!
//! ```ignore
//! use recsys_jobs::{pipeline_worker, EngineRegistry, RecommendationService, WorkerConfig};
//!
//! let service = RecommendationService::new(documents, schema, recommenders, records, registry);
//! let handle = pipeline_worker(&service)
//!     .with_config(WorkerConfig::from_env())
//!     .build()
//!     .await
//!     .start();
//!
//! service.trigger_selection("alice", 1, "Document opened").await?;
//!
//! // Graceful shutdown
//! handle.shutdown().await?;
//! ```

pub mod config;
pub mod evaluation;
pub mod guard;
pub mod handler;
pub mod prediction;
pub mod queue;
pub mod registry;
pub mod selection;
pub mod service;
pub mod task;
pub mod training;
pub mod worker;

pub use config::PipelineConfig;
pub use evaluation::{LearningCurve, LearningCurvePoint};
pub use handler::{TaskContext, TaskHandler, TaskResult};
pub use prediction::PredictionHandler;
pub use queue::{CancellationFlag, ClaimedTask, EnqueueOutcome, TaskQueue};
pub use registry::EngineRegistry;
pub use selection::SelectionHandler;
pub use service::RecommendationService;
pub use task::{MatchResult, Task, TaskKind};
pub use training::TrainingHandler;
pub use worker::{TaskWorker, WorkerBuilder, WorkerConfig, WorkerEvent, WorkerHandle};

/// Worker builder on the service's queue with all three stage handlers.
pub fn pipeline_worker(service: &RecommendationService) -> WorkerBuilder {
    WorkerBuilder::new(service.queue().clone())
        .with_handler(SelectionHandler::new(service.clone()))
        .with_handler(TrainingHandler::new(service.clone()))
        .with_handler(PredictionHandler::new(service.clone()))
}
