//! Building concrete configurations from a base plus named overrides.

use hg_types::{ConfigError, ConfigResult, FieldNaming, ParamValue, Parameters};
use std::collections::HashMap;
use std::fmt;

/// Applies named overrides onto a private copy of an initial configuration.
pub trait ParametersBuilder<P: Parameters>: Send {
    /// Apply one override.
    fn set(&mut self, name: &str, value: &ParamValue) -> ConfigResult<()>;

    /// Finish and hand out the configuration.
    fn build(self: Box<Self>) -> P;
}

/// Produces builders seeded with a copy of an initial configuration.
pub trait ParametersBuilderFactory<P: Parameters>: Send + Sync {
    fn get(&self, initial: &P) -> Box<dyn ParametersBuilder<P>>;

    /// Naming convention used to map hyperparameter names onto fields.
    fn field_naming(&self) -> FieldNaming;
}

/// Default factory: resolves names through a [`FieldNaming`] and delegates to
/// [`Parameters::set_field`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleParametersBuilderFactory {
    naming: FieldNaming,
}

impl SimpleParametersBuilderFactory {
    pub fn new(naming: FieldNaming) -> Self {
        Self { naming }
    }
}

impl<P: Parameters> ParametersBuilderFactory<P> for SimpleParametersBuilderFactory {
    fn get(&self, initial: &P) -> Box<dyn ParametersBuilder<P>> {
        Box::new(SimpleParametersBuilder::new(initial, self.naming))
    }

    fn field_naming(&self) -> FieldNaming {
        self.naming
    }
}

/// Builder behind [`SimpleParametersBuilderFactory`].
///
/// ```ignore
/// let params = SimpleParametersBuilder::new(&base, FieldNaming::Consistent)
///     .with("ntrees", &ParamValue::Int(30))?
///     .with("learn_rate", &ParamValue::Float(0.01))?
///     .finish();
/// ```
#[derive(Debug, Clone)]
pub struct SimpleParametersBuilder<P> {
    params: P,
    naming: FieldNaming,
}

impl<P: Parameters> SimpleParametersBuilder<P> {
    pub fn new(initial: &P, naming: FieldNaming) -> Self {
        Self {
            params: initial.clone(),
            naming,
        }
    }

    /// Chaining form of [`ParametersBuilder::set`].
    pub fn with(mut self, name: &str, value: &ParamValue) -> ConfigResult<Self> {
        ParametersBuilder::set(&mut self, name, value)?;
        Ok(self)
    }

    pub fn finish(self) -> P {
        self.params
    }
}

impl<P: Parameters> ParametersBuilder<P> for SimpleParametersBuilder<P> {
    fn set(&mut self, name: &str, value: &ParamValue) -> ConfigResult<()> {
        let field = self.naming.resolve(name);
        self.params.set_field(&field, value)
    }

    fn build(self: Box<Self>) -> P {
        self.params
    }
}

/// Setter applying one value to one field of `P`.
pub type FieldSetter<P> = fn(&mut P, &ParamValue) -> ConfigResult<()>;

/// Explicit name → setter table, for implementing
/// [`Parameters::set_field`] on plain structs.
pub struct FieldSetters<P> {
    setters: HashMap<&'static str, FieldSetter<P>>,
}

impl<P> FieldSetters<P> {
    pub fn new() -> Self {
        Self {
            setters: HashMap::new(),
        }
    }

    pub fn with(mut self, name: &'static str, setter: FieldSetter<P>) -> Self {
        self.setters.insert(name, setter);
        self
    }

    pub fn apply(&self, target: &mut P, name: &str, value: &ParamValue) -> ConfigResult<()> {
        let setter = self
            .setters
            .get(name)
            .ok_or_else(|| ConfigError::UnknownField {
                field: name.to_string(),
            })?;
        setter(target, value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.setters.contains_key(name)
    }
}

impl<P> Default for FieldSetters<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> fmt::Debug for FieldSetters<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&&str> = self.setters.keys().collect();
        names.sort();
        f.debug_struct("FieldSetters").field("fields", &names).finish()
    }
}
