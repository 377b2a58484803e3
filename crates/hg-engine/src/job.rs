//! Job tracking for a running search: lifecycle, progress, and stop requests.

use chrono::{DateTime, Utc};
use hg_types::Key;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// Unique identifier of a search job. Doubles as the lock owner on the grid.
pub type JobId = Uuid;

/// Lifecycle of a search job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Created,
    Running,
    Done,
    Cancelled,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Cancelled | Self::Failed)
    }
}

/// What happened to one processed point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptOutcome {
    Built,
    Reused,
    Failed,
}

/// Work units processed so far against the walker's estimate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    pub estimated: usize,
    pub processed: usize,
    pub built: usize,
    pub reused: usize,
    pub failed: usize,
}

impl JobProgress {
    /// Share of the estimate processed, in [0, 1].
    pub fn fraction(&self) -> f64 {
        if self.estimated == 0 {
            return 1.0;
        }
        (self.processed as f64 / self.estimated as f64).min(1.0)
    }
}

/// Snapshot of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub state: JobState,
    pub progress: JobProgress,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// A search job shared between the caller and the search loop.
#[derive(Debug)]
pub struct Job {
    id: JobId,
    description: String,
    dest: Key,
    status: RwLock<JobStatus>,
    stop_requested: AtomicBool,
}

impl Job {
    pub(crate) fn new(dest: Key, description: impl Into<String>, estimated: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            description: description.into(),
            dest,
            status: RwLock::new(JobStatus {
                state: JobState::Created,
                progress: JobProgress {
                    estimated,
                    ..JobProgress::default()
                },
                created_at: Utc::now(),
                started_at: None,
                finished_at: None,
                error: None,
            }),
            stop_requested: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Key of the grid this job writes into.
    pub fn dest(&self) -> &Key {
        &self.dest
    }

    /// Ask the search loop to stop before its next point. The point being
    /// built when this is called still completes and is recorded.
    pub fn cancel(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> JobStatus {
        self.status.read().clone()
    }

    pub fn state(&self) -> JobState {
        self.status.read().state
    }

    pub fn progress(&self) -> JobProgress {
        self.status.read().progress.clone()
    }

    pub(crate) fn mark_running(&self) {
        let mut status = self.status.write();
        status.state = JobState::Running;
        status.started_at = Some(Utc::now());
    }

    pub(crate) fn record(&self, outcome: AttemptOutcome) {
        let mut status = self.status.write();
        let progress = &mut status.progress;
        progress.processed += 1;
        match outcome {
            AttemptOutcome::Built => progress.built += 1,
            AttemptOutcome::Reused => progress.reused += 1,
            AttemptOutcome::Failed => progress.failed += 1,
        }
    }

    pub(crate) fn mark_done(&self) {
        self.finish(JobState::Done, None);
    }

    pub(crate) fn mark_cancelled(&self) {
        self.finish(JobState::Cancelled, None);
    }

    pub(crate) fn mark_failed(&self, error: impl Into<String>) {
        self.finish(JobState::Failed, Some(error.into()));
    }

    fn finish(&self, state: JobState, error: Option<String>) {
        let mut status = self.status.write();
        status.state = state;
        status.error = error;
        status.finished_at = Some(Utc::now());
    }
}
