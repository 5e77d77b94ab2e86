//! # recsys-active
//!
//! Active learning on top of the recommendation pipeline's predictions.
//!
//! The [`ActiveLearningService`] lists suggestion groups per layer, removes
//! duplicates, hides what the annotator already rejected or skipped and asks
//! an [`ActiveLearningStrategy`] for the next suggestion to present. Accept,
//! reject, skip and correct decisions are written to the learning record
//! history, which later prediction runs consult.
//!
//! ```ignore
//! use recsys_active::ActiveLearningService;
//!
//! let active = ActiveLearningService::new(documents, schema, records,
//!     pipeline.predictions().clone(), pipeline.events().clone());
//! active.refresh("alice", 1).await;
//! if let Some(next) = active.generate_next_suggestion("alice", &layer, &prefs).await? {
//!     active.accept("alice", 1, &next.first.document_name, next.first.id,
//!         ChangeLocation::ActiveLearningSidebar).await?;
//! }
//! ```

pub mod dedup;
pub mod service;
pub mod strategy;

pub use dedup::remove_duplicate_recommendations;
pub use service::ActiveLearningService;
pub use strategy::{ActiveLearningStrategy, UncertaintySamplingStrategy};
