//! Events emitted by a running search for external consumers.

use hg_types::Key;
use serde::{Deserialize, Serialize};

use crate::job::JobId;

/// Where a failed attempt broke down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureStage {
    /// The point could not be turned into a configuration.
    Construction,
    /// The configuration was valid but the model build failed.
    Build,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SearchEvent {
    Started {
        grid: Key,
        job: JobId,
        estimated: usize,
        resumed: bool,
    },
    ModelBuilt {
        grid: Key,
        model: Key,
    },
    ModelReused {
        grid: Key,
        model: Key,
    },
    AttemptFailed {
        grid: Key,
        stage: FailureStage,
        error: String,
    },
    Finished {
        grid: Key,
        models: usize,
        failures: usize,
    },
    Cancelled {
        grid: Key,
        processed: usize,
    },
    Aborted {
        grid: Key,
        error: String,
    },
}

impl SearchEvent {
    pub fn grid(&self) -> &Key {
        match self {
            Self::Started { grid, .. }
            | Self::ModelBuilt { grid, .. }
            | Self::ModelReused { grid, .. }
            | Self::AttemptFailed { grid, .. }
            | Self::Finished { grid, .. }
            | Self::Cancelled { grid, .. }
            | Self::Aborted { grid, .. } => grid,
        }
    }
}
