//! # hg-space
//!
//! Hyper space definitions for hypergrid: building concrete configurations
//! from a base plus named overrides, and strategies for walking the space of
//! candidate values (exhaustive cartesian, seeded random discrete).

mod builder;
mod walker;

pub use builder::{
    FieldSetter, FieldSetters, ParametersBuilder, ParametersBuilderFactory,
    SimpleParametersBuilder, SimpleParametersBuilderFactory,
};
pub use walker::{CartesianWalker, HyperSpaceIterator, HyperSpaceWalker, RandomDiscreteWalker};
