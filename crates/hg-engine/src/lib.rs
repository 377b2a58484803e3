//! # hg-engine
//!
//! Grid search orchestration for hypergrid. An [`Orchestrator`] resolves or
//! creates a [`hg_types::Grid`] in a repository, locks it, and walks a hyper
//! space on a background task, building one model per distinct configuration
//! through an [`ArtifactFactory`]. Progress is exposed through [`Job`] and
//! optional [`SearchEvent`]s.

pub mod events;
pub mod factory;
pub mod job;
pub mod search;
pub mod settings;

pub use events::{FailureStage, SearchEvent};
pub use factory::{ArtifactFactory, BuildHandle};
pub use job::{AttemptOutcome, Job, JobId, JobProgress, JobState, JobStatus};
pub use search::{grid_key_name, GridSearch, Orchestrator, SearchHandle};
pub use settings::SearchSettings;
