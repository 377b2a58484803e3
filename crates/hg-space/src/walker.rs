//! Hyper space traversal strategies.
//!
//! A [`HyperSpaceWalker`] owns the definition of a hyper space (a base
//! configuration plus candidate values per field) and hands out one-shot
//! [`HyperSpaceIterator`]s over it.

use hg_types::{Artifact, ConfigResult, FieldNaming, ParamValue, Parameters};
use indexmap::IndexMap;
use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::sync::Arc;

use crate::builder::{ParametersBuilderFactory, SimpleParametersBuilderFactory};

/// Forward-only cursor over the points of a hyper space.
pub trait HyperSpaceIterator<P: Parameters>: Send {
    /// Whether another point remains. `previous` is the most recently built
    /// artifact, for strategies that adapt to results.
    fn has_next(&self, previous: Option<&Artifact>) -> bool;

    /// Materialize the next point. The cursor advances even when the point
    /// cannot be turned into a configuration.
    fn next_model_parameters(&mut self, previous: Option<&Artifact>) -> ConfigResult<P>;

    /// Candidate tuple of the point most recently handed out, in field order.
    fn current_raw_parameters(&self) -> &[ParamValue];
}

/// Traversal strategy over a hyper space.
pub trait HyperSpaceWalker<P: Parameters>: Send + Sync {
    /// Estimated number of points. An upper bound on distinct models, since
    /// distinct points may share an effective configuration. Saturates at
    /// `usize::MAX` for spaces too large to count.
    fn hyper_space_size(&self) -> usize;

    fn iter(&self) -> Box<dyn HyperSpaceIterator<P>>;

    /// Base configuration every point derives from.
    fn params(&self) -> &P;

    fn hyper_param_names(&self) -> Vec<String>;

    fn field_naming(&self) -> FieldNaming;
}

/// Spaces up to this many points are shuffled up front by a random walk.
const EAGER_SHUFFLE_LIMIT: usize = 1 << 20;

/// Shared definition of a discrete hyper space.
struct HyperSpace<P: Parameters> {
    base: P,
    names: Vec<String>,
    values: Vec<Vec<ParamValue>>,
    builders: Arc<dyn ParametersBuilderFactory<P>>,
}

impl<P: Parameters> HyperSpace<P> {
    fn new(
        base: P,
        hyper_params: IndexMap<String, Vec<ParamValue>>,
        builders: Arc<dyn ParametersBuilderFactory<P>>,
    ) -> Self {
        let (names, values): (Vec<String>, Vec<Vec<ParamValue>>) =
            hyper_params.into_iter().unzip();
        Self {
            base,
            names,
            values,
            builders,
        }
    }

    /// Product of candidate list lengths, `usize::MAX` on overflow.
    fn size(&self) -> usize {
        if self.values.iter().any(Vec::is_empty) {
            return 0;
        }
        self.values
            .iter()
            .try_fold(1usize, |acc, candidates| acc.checked_mul(candidates.len()))
            .unwrap_or(usize::MAX)
    }

    /// Candidate tuple at `position` of the nested enumeration; the first
    /// field varies slowest.
    fn point(&self, mut position: usize) -> Vec<ParamValue> {
        let mut picked = vec![None; self.values.len()];
        for (dim, candidates) in self.values.iter().enumerate().rev() {
            let len = candidates.len().max(1);
            picked[dim] = candidates.get(position % len).cloned();
            position /= len;
        }
        picked.into_iter().flatten().collect()
    }

    /// Apply `raw` onto a fresh copy of the base, in field order.
    fn materialize(&self, raw: &[ParamValue]) -> ConfigResult<P> {
        let mut builder = self.builders.get(&self.base);
        for (name, value) in self.names.iter().zip(raw) {
            builder.set(name, value)?;
        }
        Ok(builder.build())
    }
}

/// Iterator over an explicit visiting order of grid positions.
struct OrderedIterator<P: Parameters> {
    space: Arc<HyperSpace<P>>,
    order: Box<dyn Iterator<Item = usize> + Send>,
    remaining: usize,
    current: Vec<ParamValue>,
}

impl<P: Parameters> HyperSpaceIterator<P> for OrderedIterator<P> {
    fn has_next(&self, _previous: Option<&Artifact>) -> bool {
        self.remaining > 0
    }

    fn next_model_parameters(&mut self, _previous: Option<&Artifact>) -> ConfigResult<P> {
        let position = self.order.next().unwrap_or(0);
        self.remaining = self.remaining.saturating_sub(1);
        self.current = self.space.point(position);
        self.space.materialize(&self.current)
    }

    fn current_raw_parameters(&self) -> &[ParamValue] {
        &self.current
    }
}

/// Distinct positions below `total` drawn on demand, for spaces too large to
/// shuffle. Memory grows with the number of positions drawn.
struct LazySample {
    rng: StdRng,
    total: usize,
    drawn: HashSet<usize>,
}

impl Iterator for LazySample {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.drawn.len() >= self.total {
            return None;
        }
        loop {
            let position = self.rng.random_range(0..self.total);
            if self.drawn.insert(position) {
                return Some(position);
            }
        }
    }
}

/// Exhaustive walk of the cartesian product of all candidate lists.
pub struct CartesianWalker<P: Parameters> {
    space: Arc<HyperSpace<P>>,
}

impl<P: Parameters> CartesianWalker<P> {
    pub fn new(
        params: P,
        hyper_params: IndexMap<String, Vec<ParamValue>>,
        builders: Arc<dyn ParametersBuilderFactory<P>>,
    ) -> Self {
        Self {
            space: Arc::new(HyperSpace::new(params, hyper_params, builders)),
        }
    }

    /// Walker using [`SimpleParametersBuilderFactory`] with consistent naming.
    pub fn with_defaults(params: P, hyper_params: IndexMap<String, Vec<ParamValue>>) -> Self {
        Self::new(
            params,
            hyper_params,
            Arc::new(SimpleParametersBuilderFactory::default()),
        )
    }
}

impl<P: Parameters> HyperSpaceWalker<P> for CartesianWalker<P> {
    fn hyper_space_size(&self) -> usize {
        self.space.size()
    }

    fn iter(&self) -> Box<dyn HyperSpaceIterator<P>> {
        let size = self.space.size();
        Box::new(OrderedIterator {
            space: Arc::clone(&self.space),
            order: Box::new(0..size),
            remaining: size,
            current: Vec::new(),
        })
    }

    fn params(&self) -> &P {
        &self.space.base
    }

    fn hyper_param_names(&self) -> Vec<String> {
        self.space.names.clone()
    }

    fn field_naming(&self) -> FieldNaming {
        self.space.builders.field_naming()
    }
}

/// Random walk over grid points, without replacement.
///
/// Visits at most `max_models` points (all of them when unset) in an order
/// fixed by `seed`. Spaces larger than 2^20 points are sampled lazily, so an
/// uncapped walk over a huge space costs memory per visited point only.
pub struct RandomDiscreteWalker<P: Parameters> {
    space: Arc<HyperSpace<P>>,
    max_models: Option<usize>,
    seed: u64,
}

impl<P: Parameters> RandomDiscreteWalker<P> {
    pub fn new(
        params: P,
        hyper_params: IndexMap<String, Vec<ParamValue>>,
        builders: Arc<dyn ParametersBuilderFactory<P>>,
        seed: u64,
    ) -> Self {
        Self {
            space: Arc::new(HyperSpace::new(params, hyper_params, builders)),
            max_models: None,
            seed,
        }
    }

    pub fn with_max_models(mut self, max_models: usize) -> Self {
        self.max_models = Some(max_models);
        self
    }
}

impl<P: Parameters> HyperSpaceWalker<P> for RandomDiscreteWalker<P> {
    fn hyper_space_size(&self) -> usize {
        let total = self.space.size();
        self.max_models.map_or(total, |cap| cap.min(total))
    }

    fn iter(&self) -> Box<dyn HyperSpaceIterator<P>> {
        let total = self.space.size();
        let amount = self.hyper_space_size();
        let mut rng = StdRng::seed_from_u64(self.seed);
        let order: Box<dyn Iterator<Item = usize> + Send> = if total <= EAGER_SHUFFLE_LIMIT {
            Box::new(index::sample(&mut rng, total, amount).into_iter())
        } else {
            Box::new(LazySample {
                rng,
                total,
                drawn: HashSet::new(),
            })
        };
        Box::new(OrderedIterator {
            space: Arc::clone(&self.space),
            order,
            remaining: amount,
            current: Vec::new(),
        })
    }

    fn params(&self) -> &P {
        &self.space.base
    }

    fn hyper_param_names(&self) -> Vec<String> {
        self.space.names.clone()
    }

    fn field_naming(&self) -> FieldNaming {
        self.space.builders.field_naming()
    }
}
