//! Grid search orchestration.
//!
//! A search resolves (or creates) its [`Grid`] in the repository, takes the
//! grid's exclusive lock, then walks the hyper space one point at a time:
//! each point is built, or reused when a configuration with the same
//! fingerprint was built before, and the grid is persisted after every
//! attempt. Failures of a single point are recorded on the grid and never
//! stop the walk. The lock is released whatever way the loop ends.

use crossbeam_channel::Sender;
use hg_space::{
    CartesianWalker, HyperSpaceWalker, ParametersBuilderFactory, SimpleParametersBuilderFactory,
};
use hg_store::{Entity, Repository};
use hg_types::{
    Artifact, AttemptInputs, BuildError, Grid, HgResult, Key, ParamValue, Parameters, SearchError,
    SourceRef,
};
use indexmap::IndexMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::events::{FailureStage, SearchEvent};
use crate::factory::{panic_message, ArtifactFactory};
use crate::job::{AttemptOutcome, Job, JobId};
use crate::settings::SearchSettings;

/// Entry point for starting grid searches against one repository.
pub struct Orchestrator {
    repository: Arc<dyn Repository>,
    settings: SearchSettings,
    events: Option<Sender<SearchEvent>>,
}

impl Orchestrator {
    pub fn new(repository: Arc<dyn Repository>) -> Self {
        Self {
            repository,
            settings: SearchSettings::default(),
            events: None,
        }
    }

    pub fn with_settings(mut self, settings: SearchSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Publish [`SearchEvent`]s of every search started from here.
    pub fn with_events(mut self, events: Sender<SearchEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repository
    }

    /// Start an exhaustive search over the cartesian product of
    /// `hyper_params`, applied onto copies of `params`.
    ///
    /// Without `builders`, values are applied through
    /// [`Parameters::set_field`] with consistent naming. Without `dest`, the
    /// grid key is derived from the model name and the source of `params`.
    pub async fn start_grid_search<P: Parameters>(
        &self,
        dest: Option<Key>,
        params: P,
        hyper_params: IndexMap<String, Vec<ParamValue>>,
        factory: Arc<dyn ArtifactFactory<P>>,
        builders: Option<Arc<dyn ParametersBuilderFactory<P>>>,
    ) -> HgResult<SearchHandle> {
        let builders =
            builders.unwrap_or_else(|| Arc::new(SimpleParametersBuilderFactory::default()));
        let walker = CartesianWalker::new(params, hyper_params, builders);
        self.start_search(dest, factory, Arc::new(walker)).await
    }

    /// Start a search driven by a custom walker.
    pub async fn start_search<P: Parameters>(
        &self,
        dest: Option<Key>,
        factory: Arc<dyn ArtifactFactory<P>>,
        walker: Arc<dyn HyperSpaceWalker<P>>,
    ) -> HgResult<SearchHandle> {
        self.search(dest, factory, walker)?.start().await
    }

    /// Prepare a search without starting it.
    pub fn search<P: Parameters>(
        &self,
        dest: Option<Key>,
        factory: Arc<dyn ArtifactFactory<P>>,
        walker: Arc<dyn HyperSpaceWalker<P>>,
    ) -> HgResult<GridSearch<P>> {
        self.settings.validate()?;
        let key = match dest {
            Some(key) => key,
            None => grid_key_name(
                &self.settings.grid_prefix,
                factory.model_name(),
                walker.params().source(),
            )?,
        };

        Ok(GridSearch {
            key,
            factory,
            walker,
            repository: Arc::clone(&self.repository),
            model_key_infix: self.settings.model_key_infix.clone(),
            events: self.events.clone(),
        })
    }
}

/// `<prefix>_<model>_<source key>_<unique suffix>`.
pub fn grid_key_name(
    prefix: &str,
    model_name: &str,
    source: Option<&SourceRef>,
) -> HgResult<Key> {
    let source = source.ok_or(SearchError::MissingSource)?;
    Ok(Key::new(format!(
        "{prefix}_{model_name}_{}_{}",
        source.key,
        Uuid::new_v4().simple()
    )))
}

/// A search bound to its destination key, ready to start.
pub struct GridSearch<P: Parameters> {
    key: Key,
    factory: Arc<dyn ArtifactFactory<P>>,
    walker: Arc<dyn HyperSpaceWalker<P>>,
    repository: Arc<dyn Repository>,
    model_key_infix: String,
    events: Option<Sender<SearchEvent>>,
}

impl<P: Parameters> GridSearch<P> {
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Estimated number of points; an upper bound on the models built.
    pub fn model_count(&self) -> usize {
        self.walker.hyper_space_size()
    }

    /// Resolve and lock the grid, then run the walk on a background task.
    ///
    /// Fails without touching the repository when the key names a non-grid
    /// entity or a grid built over a different source, and with
    /// [`hg_types::StoreError::Locked`] when another job holds the grid. If
    /// the returned future is dropped after the lock was taken, the lock is
    /// released on a background task.
    pub async fn start(self) -> HgResult<SearchHandle> {
        let estimated = self.model_count();
        let job = Arc::new(Job::new(
            self.key.clone(),
            format!("{} Grid Search", self.factory.model_name()),
            estimated,
        ));

        let (grid, resumed, lock) = self.acquire(job.id()).await?;
        info!(
            grid = %self.key,
            job = %job.id(),
            estimated,
            resumed,
            prior_attempts = grid.attempts(),
            "starting grid search"
        );

        job.mark_running();
        emit(
            &self.events,
            SearchEvent::Started {
                grid: self.key.clone(),
                job: job.id(),
                estimated,
                resumed,
            },
        );

        let key = self.key.clone();
        let search = SearchLoop {
            model_key_prefix: format!("{}{}", self.key, self.model_key_infix),
            key: self.key,
            factory: self.factory,
            walker: self.walker,
            repository: self.repository,
            job: Arc::clone(&job),
            events: self.events,
        };
        let task = tokio::spawn(search.supervise(grid));
        lock.hand_over();

        Ok(SearchHandle {
            key,
            job,
            estimated,
            task,
        })
    }

    async fn acquire(&self, owner: JobId) -> HgResult<(Grid, bool, PendingLock)> {
        match self.repository.get(&self.key).await? {
            Some(Entity::Grid(grid)) => {
                self.ensure_resumable(&grid)?;
                self.repository.lock(&self.key, owner).await?;
                let lock = PendingLock::new(Arc::clone(&self.repository), self.key.clone(), owner);

                // Another job may have persisted between the lookup and the lock.
                match self.repository.get(&self.key).await {
                    Ok(Some(Entity::Grid(latest))) => match self.ensure_resumable(&latest) {
                        Ok(()) => Ok((latest, true, lock)),
                        Err(e) => {
                            lock.release().await;
                            Err(e)
                        }
                    },
                    Ok(other) => {
                        lock.release().await;
                        Err(SearchError::NameConflict {
                            key: self.key.to_string(),
                            kind: other.map_or("nothing", |e| e.kind()).to_string(),
                        }
                        .into())
                    }
                    Err(e) => {
                        lock.release().await;
                        Err(e.into())
                    }
                }
            }
            Some(other) => Err(SearchError::NameConflict {
                key: self.key.to_string(),
                kind: other.kind().to_string(),
            }
            .into()),
            None => {
                let grid = Grid::new(
                    self.key.clone(),
                    self.walker.params(),
                    self.walker.hyper_param_names(),
                    self.factory.model_name(),
                    self.walker.field_naming(),
                )?;
                self.repository
                    .create_and_lock(Entity::Grid(grid.clone()), owner)
                    .await?;
                let lock = PendingLock::new(Arc::clone(&self.repository), self.key.clone(), owner);
                Ok((grid, false, lock))
            }
        }
    }

    fn ensure_resumable(&self, grid: &Grid) -> HgResult<()> {
        if grid.key != self.key {
            return Err(SearchError::KeyMismatch {
                key: self.key.to_string(),
                found: grid.key.to_string(),
            }
            .into());
        }
        if !grid.same_source(self.walker.params().source()) {
            return Err(SearchError::SourceMismatch {
                key: self.key.to_string(),
            }
            .into());
        }
        Ok(())
    }
}

/// Grid lock taken by [`GridSearch::start`] and not yet owned by a search
/// loop. Dropped while armed, it releases the lock on a fresh task.
struct PendingLock {
    repository: Arc<dyn Repository>,
    key: Key,
    owner: JobId,
    armed: bool,
}

impl PendingLock {
    fn new(repository: Arc<dyn Repository>, key: Key, owner: JobId) -> Self {
        Self {
            repository,
            key,
            owner,
            armed: true,
        }
    }

    /// The search loop releases the lock from here on.
    fn hand_over(mut self) {
        self.armed = false;
    }

    async fn release(mut self) {
        let released = self.repository.unlock(&self.key, self.owner).await;
        self.armed = false;
        if let Err(e) = released {
            warn!(grid = %self.key, error = %e, "failed to release grid lock");
        }
    }
}

impl Drop for PendingLock {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            error!(grid = %self.key, job = %self.owner, "search start abandoned outside a runtime; grid lock stays held");
            return;
        };
        warn!(grid = %self.key, job = %self.owner, "search start abandoned; releasing grid lock");
        let repository = Arc::clone(&self.repository);
        let key = self.key.clone();
        let owner = self.owner;
        runtime.spawn(async move {
            if let Err(e) = repository.unlock(&key, owner).await {
                warn!(grid = %key, error = %e, "failed to release grid lock");
            }
        });
    }
}

/// Handle on a running search.
#[derive(Debug)]
pub struct SearchHandle {
    key: Key,
    job: Arc<Job>,
    estimated: usize,
    task: JoinHandle<HgResult<Grid>>,
}

impl SearchHandle {
    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn job(&self) -> &Arc<Job> {
        &self.job
    }

    /// Walker estimate captured at start.
    pub fn model_count(&self) -> usize {
        self.estimated
    }

    /// Request a cooperative stop; see [`Job::cancel`].
    pub fn cancel(&self) {
        self.job.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the search to end and return the final grid. A cancelled
    /// search still yields its partial grid.
    pub async fn get(self) -> HgResult<Grid> {
        match self.task.await {
            Ok(result) => result,
            Err(join) => Err(SearchError::Aborted {
                job: self.job.id().to_string(),
                message: join.to_string(),
            }
            .into()),
        }
    }
}

enum LoopExit {
    Exhausted,
    Cancelled,
}

struct SearchLoop<P: Parameters> {
    key: Key,
    model_key_prefix: String,
    factory: Arc<dyn ArtifactFactory<P>>,
    walker: Arc<dyn HyperSpaceWalker<P>>,
    repository: Arc<dyn Repository>,
    job: Arc<Job>,
    events: Option<Sender<SearchEvent>>,
}

/// Result of a successful point.
enum Resolved {
    Built(Artifact),
    Reused(Artifact),
}

impl<P: Parameters> SearchLoop<P> {
    /// Run the walk on its own task and settle the job once it ends. The
    /// lock is released before the job reaches a terminal state.
    async fn supervise(self, grid: Grid) -> HgResult<Grid> {
        let key = self.key.clone();
        let job = Arc::clone(&self.job);
        let repository = Arc::clone(&self.repository);
        let events = self.events.clone();

        let outcome = tokio::spawn(self.run(grid)).await;

        if let Err(e) = repository.unlock(&key, job.id()).await {
            error!(grid = %key, job = %job.id(), error = %e, "failed to release grid lock");
        }

        let processed = job.progress().processed;
        match outcome {
            Ok(Ok((grid, LoopExit::Exhausted))) => {
                job.mark_done();
                info!(
                    grid = %key,
                    processed,
                    models = grid.model_count(),
                    failures = grid.failure_count(),
                    "grid search finished"
                );
                emit(
                    &events,
                    SearchEvent::Finished {
                        grid: key,
                        models: grid.model_count(),
                        failures: grid.failure_count(),
                    },
                );
                Ok(grid)
            }
            Ok(Ok((grid, LoopExit::Cancelled))) => {
                job.mark_cancelled();
                info!(grid = %key, processed, "grid search cancelled");
                emit(&events, SearchEvent::Cancelled { grid: key, processed });
                Ok(grid)
            }
            Ok(Err(e)) => {
                error!(grid = %key, processed, error = %e, "grid search failed");
                job.mark_failed(e.to_string());
                emit(
                    &events,
                    SearchEvent::Aborted {
                        grid: key,
                        error: e.to_string(),
                    },
                );
                Err(e)
            }
            Err(join) => {
                let message = if join.is_panic() {
                    panic_message(join.into_panic())
                } else {
                    join.to_string()
                };
                error!(grid = %key, processed, error = %message, "grid search aborted");
                job.mark_failed(message.clone());
                emit(
                    &events,
                    SearchEvent::Aborted {
                        grid: key,
                        error: message.clone(),
                    },
                );
                Err(SearchError::Aborted {
                    job: job.id().to_string(),
                    message,
                }
                .into())
            }
        }
    }

    async fn run(self, mut grid: Grid) -> HgResult<(Grid, LoopExit)> {
        let mut points = self.walker.iter();
        // Continues from the persisted attempt count so model keys stay unique
        // across resumptions.
        let mut next_index = grid.attempts();
        let mut previous: Option<Artifact> = None;

        while points.has_next(previous.as_ref()) {
            if self.job.stop_requested() {
                return Ok((grid, LoopExit::Cancelled));
            }

            // Builder panics are per-point failures.
            let constructed = match catch_unwind(AssertUnwindSafe(|| {
                points.next_model_parameters(previous.as_ref())
            })) {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(payload) => Err(format!(
                    "configuration builder panicked: {}",
                    panic_message(payload)
                )),
            };
            let outcome = match constructed {
                Ok(mut params) => {
                    let index = next_index;
                    next_index += 1;
                    match self.build_or_reuse(&mut params, &mut grid, index).await {
                        Ok(Resolved::Built(artifact)) => {
                            self.emit(SearchEvent::ModelBuilt {
                                grid: self.key.clone(),
                                model: artifact.key.clone(),
                            });
                            previous = Some(artifact);
                            AttemptOutcome::Built
                        }
                        Ok(Resolved::Reused(artifact)) => {
                            self.emit(SearchEvent::ModelReused {
                                grid: self.key.clone(),
                                model: artifact.key.clone(),
                            });
                            previous = Some(artifact);
                            AttemptOutcome::Reused
                        }
                        Err(e) => {
                            warn!(grid = %self.key, index, error = %e, "model build failed");
                            grid.append_failure(
                                AttemptInputs::Configured(configured_inputs(&params)),
                                &e,
                            );
                            self.emit(SearchEvent::AttemptFailed {
                                grid: self.key.clone(),
                                stage: FailureStage::Build,
                                error: e.to_string(),
                            });
                            AttemptOutcome::Failed
                        }
                    }
                }
                Err(e) => {
                    let raw = points.current_raw_parameters().to_vec();
                    warn!(grid = %self.key, raw = ?raw, error = %e, "invalid hyperparameter combination");
                    grid.append_failure(AttemptInputs::Raw(raw), &e);
                    self.emit(SearchEvent::AttemptFailed {
                        grid: self.key.clone(),
                        stage: FailureStage::Construction,
                        error: e.to_string(),
                    });
                    AttemptOutcome::Failed
                }
            };

            grid.record_attempt();
            self.job.record(outcome);
            self.repository
                .persist(&Entity::Grid(grid.clone()), self.job.id())
                .await?;
        }

        Ok((grid, LoopExit::Exhausted))
    }

    /// Build `params` unless a model with the same fingerprint is already on
    /// the grid. The fingerprint is taken before the model id is assigned.
    async fn build_or_reuse(
        &self,
        params: &mut P,
        grid: &mut Grid,
        index: u64,
    ) -> Result<Resolved, BuildError> {
        let fingerprint = catch_unwind(AssertUnwindSafe(|| params.fingerprint()))
            .map_err(|payload| BuildError::Panicked {
                message: panic_message(payload),
            })?
            .map_err(|e| BuildError::failed(format!("cannot fingerprint configuration: {e}")))?;

        if let Some(model) = grid.model_key(&fingerprint).cloned() {
            debug!(grid = %self.key, model = %model, fingerprint = %fingerprint, "reusing model");
            return self.resolve_artifact(&model).await.map(Resolved::Reused);
        }

        params.set_model_id(Key::new(format!("{}{}", self.model_key_prefix, index)));
        let build = catch_unwind(AssertUnwindSafe(|| self.factory.build_model(params.clone())))
            .map_err(|payload| BuildError::Panicked {
                message: panic_message(payload),
            })?;
        let artifact = build.wait().await?;

        self.repository
            .put(Entity::Artifact(artifact.clone()))
            .await
            .map_err(|e| BuildError::Unrecorded {
                key: artifact.key.to_string(),
                message: e.to_string(),
            })?;
        grid.put_model(fingerprint, artifact.key.clone());
        debug!(grid = %self.key, model = %artifact.key, index, "model built");
        Ok(Resolved::Built(artifact))
    }

    async fn resolve_artifact(&self, model: &Key) -> Result<Artifact, BuildError> {
        match self.repository.get(model).await {
            Ok(Some(Entity::Artifact(artifact))) => Ok(artifact),
            _ => Err(BuildError::MissingArtifact {
                key: model.to_string(),
            }),
        }
    }

    fn emit(&self, event: SearchEvent) {
        emit(&self.events, event);
    }
}

fn emit(events: &Option<Sender<SearchEvent>>, event: SearchEvent) {
    if let Some(tx) = events {
        let _ = tx.try_send(event);
    }
}

fn configured_inputs<P: Parameters>(params: &P) -> serde_json::Value {
    serde_json::to_value(params).unwrap_or_else(|e| {
        serde_json::Value::String(format!("<unserializable configuration: {e}>"))
    })
}
