//! Model builders plugged into a grid search.

use hg_types::{Artifact, BuildError, Parameters};
use std::any::Any;
use std::future::Future;
use tokio::task::JoinHandle;

/// Builds one model per configuration handed out by a search.
///
/// `build_model` must return promptly; the actual work runs behind the
/// returned [`BuildHandle`].
pub trait ArtifactFactory<P: Parameters>: Send + Sync {
    /// Algorithm name, used in grid keys and job descriptions.
    fn model_name(&self) -> &str;

    fn build_model(&self, params: P) -> BuildHandle;
}

enum BuildState {
    Running(JoinHandle<Result<Artifact, BuildError>>),
    Ready(Result<Artifact, BuildError>),
}

/// Pending result of a single model build.
pub struct BuildHandle {
    state: BuildState,
}

impl BuildHandle {
    /// Run `build` as a tokio task. Must be called from within a runtime.
    pub fn spawn<F>(build: F) -> Self
    where
        F: Future<Output = Result<Artifact, BuildError>> + Send + 'static,
    {
        Self {
            state: BuildState::Running(tokio::spawn(build)),
        }
    }

    /// Run a CPU-bound build on the blocking pool.
    pub fn spawn_blocking<F>(build: F) -> Self
    where
        F: FnOnce() -> Result<Artifact, BuildError> + Send + 'static,
    {
        Self {
            state: BuildState::Running(tokio::task::spawn_blocking(build)),
        }
    }

    /// Already-settled build.
    pub fn ready(result: Result<Artifact, BuildError>) -> Self {
        Self {
            state: BuildState::Ready(result),
        }
    }

    pub fn is_finished(&self) -> bool {
        match &self.state {
            BuildState::Running(task) => task.is_finished(),
            BuildState::Ready(_) => true,
        }
    }

    /// Wait for the build. A panicking build surfaces as
    /// [`BuildError::Panicked`] instead of unwinding into the caller.
    pub async fn wait(self) -> Result<Artifact, BuildError> {
        match self.state {
            BuildState::Ready(result) => result,
            BuildState::Running(task) => match task.await {
                Ok(result) => result,
                Err(join) if join.is_panic() => Err(BuildError::Panicked {
                    message: panic_message(join.into_panic()),
                }),
                Err(_) => Err(BuildError::Aborted),
            },
        }
    }
}

impl std::fmt::Debug for BuildHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildHandle")
            .field("finished", &self.is_finished())
            .finish()
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
