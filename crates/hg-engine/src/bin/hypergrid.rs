use anyhow::Context;
use hg_engine::{ArtifactFactory, BuildHandle, Orchestrator, SearchEvent, SearchSettings};
use hg_space::{
    HyperSpaceWalker, ParametersBuilderFactory, RandomDiscreteWalker,
    SimpleParametersBuilderFactory,
};
use hg_store::JsonFileRepository;
use hg_types::{Artifact, BuildError, FieldNaming, Key, ParamValue, ParameterSet};
use indexmap::IndexMap;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Search plan read from JSON.
#[derive(Debug, Deserialize)]
struct SearchPlan {
    dest: Option<Key>,
    model_name: String,
    base: ParameterSet,
    hyper_params: IndexMap<String, Vec<ParamValue>>,
    #[serde(default)]
    field_naming: FieldNaming,
    /// Random walk instead of the full product.
    random: Option<RandomWalk>,
}

#[derive(Debug, Deserialize)]
struct RandomWalk {
    seed: u64,
    max_models: Option<usize>,
}

/// Factory that "builds" a model by summarizing its numeric fields.
struct DryRunFactory {
    model_name: String,
}

impl ArtifactFactory<ParameterSet> for DryRunFactory {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn build_model(&self, params: ParameterSet) -> BuildHandle {
        let model_name = self.model_name.clone();
        BuildHandle::spawn_blocking(move || {
            let key = params
                .model_id
                .clone()
                .ok_or_else(|| BuildError::failed("no model id assigned"))?;
            let score: f64 = params
                .values
                .values()
                .filter_map(|value| match value {
                    ParamValue::Int(v) => Some(*v as f64),
                    ParamValue::Float(v) => Some(*v),
                    _ => None,
                })
                .sum();
            Ok(Artifact::new(key, model_name).with_metric("score", score))
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let plan_path = std::env::var("HYPERGRID_PLAN")
        .ok()
        .or_else(|| std::env::args().nth(1))
        .context("usage: hypergrid <plan.json> (or set HYPERGRID_PLAN)")?;
    let plan: SearchPlan = serde_json::from_slice(
        &tokio::fs::read(&plan_path)
            .await
            .with_context(|| format!("reading search plan {plan_path}"))?,
    )
    .with_context(|| format!("parsing search plan {plan_path}"))?;

    let settings = SearchSettings::from_env();
    let repository = Arc::new(JsonFileRepository::new(settings.store_dir())?);
    info!(store = %repository.root().display(), plan = %plan_path, "loaded search plan");

    let (events_tx, events_rx) = crossbeam_channel::unbounded();
    let orchestrator = Orchestrator::new(repository)
        .with_settings(settings)
        .with_events(events_tx);

    let factory: Arc<dyn ArtifactFactory<ParameterSet>> = Arc::new(DryRunFactory {
        model_name: plan.model_name,
    });
    let builders: Arc<dyn ParametersBuilderFactory<ParameterSet>> =
        Arc::new(SimpleParametersBuilderFactory::new(plan.field_naming));
    let handle = match plan.random {
        Some(walk) => {
            let mut walker =
                RandomDiscreteWalker::new(plan.base, plan.hyper_params, builders, walk.seed);
            if let Some(max_models) = walk.max_models {
                walker = walker.with_max_models(max_models);
            }
            let walker: Arc<dyn HyperSpaceWalker<ParameterSet>> = Arc::new(walker);
            orchestrator.start_search(plan.dest, factory, walker).await?
        }
        None => {
            orchestrator
                .start_grid_search(
                    plan.dest,
                    plan.base,
                    plan.hyper_params,
                    factory,
                    Some(builders),
                )
                .await?
        }
    };

    let job = Arc::clone(handle.job());
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            job.cancel();
        }
    });

    let job = Arc::clone(handle.job());
    let grid = handle.get().await?;

    let progress = job.progress();
    println!("Grid {} ({:?})", grid.key, job.state());
    println!(
        "  processed {}/{} points: {} built, {} reused, {} failed ({} attempts overall)",
        progress.processed,
        progress.estimated,
        progress.built,
        progress.reused,
        progress.failed,
        grid.attempts()
    );
    for model in grid.model_keys() {
        println!("  model {model}");
    }
    for event in events_rx.try_iter() {
        if let SearchEvent::AttemptFailed { stage, error, .. } = event {
            println!("  failed ({stage:?}): {error}");
        }
    }

    Ok(())
}
