//! Configuration values and the capability a configuration type must offer to
//! be searched over.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use crate::errors::{ConfigError, ConfigResult};
use crate::keys::{Fingerprint, Key, SourceRef};

/// A single candidate value for a hyperparameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
        }
    }

    fn mismatch(&self, field: &str, expected: &str) -> ConfigError {
        ConfigError::TypeMismatch {
            field: field.to_string(),
            expected: expected.to_string(),
            found: self.kind().to_string(),
        }
    }

    pub fn as_bool(&self, field: &str) -> ConfigResult<bool> {
        match self {
            Self::Bool(v) => Ok(*v),
            other => Err(other.mismatch(field, "bool")),
        }
    }

    pub fn as_i64(&self, field: &str) -> ConfigResult<i64> {
        match self {
            Self::Int(v) => Ok(*v),
            other => Err(other.mismatch(field, "int")),
        }
    }

    /// Integer narrowed to `u32`, rejecting negative or oversized values.
    pub fn as_u32(&self, field: &str) -> ConfigResult<u32> {
        let v = self.as_i64(field)?;
        u32::try_from(v).map_err(|_| ConfigError::InvalidValue {
            field: field.to_string(),
            message: format!("{v} does not fit an unsigned 32-bit integer"),
        })
    }

    /// Float value; integers are widened.
    pub fn as_f64(&self, field: &str) -> ConfigResult<f64> {
        match self {
            Self::Float(v) => Ok(*v),
            Self::Int(v) => Ok(*v as f64),
            other => Err(other.mismatch(field, "float")),
        }
    }

    pub fn as_text(&self, field: &str) -> ConfigResult<&str> {
        match self {
            Self::Text(v) => Ok(v),
            other => Err(other.mismatch(field, "text")),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v}"),
        }
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// How hyperparameter names map onto configuration field names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldNaming {
    /// Names are used unchanged.
    #[default]
    Consistent,
    /// Configuration fields carry a leading underscore the supplied names lack.
    DestHasUnderscores,
    /// Supplied names carry a leading underscore the configuration fields lack.
    OriginHasUnderscores,
}

impl FieldNaming {
    /// Map a supplied hyperparameter name to the configuration field name.
    pub fn resolve<'a>(&self, name: &'a str) -> Cow<'a, str> {
        match self {
            Self::Consistent => Cow::Borrowed(name),
            Self::DestHasUnderscores if name.starts_with('_') => Cow::Borrowed(name),
            Self::DestHasUnderscores => Cow::Owned(format!("_{name}")),
            Self::OriginHasUnderscores => Cow::Borrowed(name.strip_prefix('_').unwrap_or(name)),
        }
    }
}

/// Capability required of a configuration type to take part in a search.
///
/// Field application goes through [`Parameters::set_field`], an explicit
/// name-keyed setter; see `hg_space::FieldSetters` for a table-driven way to
/// implement it on plain structs.
pub trait Parameters:
    Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Override one named field.
    fn set_field(&mut self, name: &str, value: &ParamValue) -> ConfigResult<()>;

    /// The dataset this configuration trains against.
    fn source(&self) -> Option<&SourceRef>;

    /// Identifier of the artifact this configuration will produce, if assigned.
    fn model_id(&self) -> Option<&Key>;

    fn set_model_id(&mut self, key: Key);

    /// Checksum of the effective configuration. Must be taken before a model
    /// id is assigned.
    fn fingerprint(&self) -> Result<Fingerprint, serde_json::Error> {
        Fingerprint::of(self)
    }
}

/// Open, type-checked set of named configuration values.
///
/// Overriding an existing field requires a value of the same kind (ints
/// widen into float fields); unseen fields are added.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<Key>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceRef>,
    #[serde(default)]
    pub values: BTreeMap<String, ParamValue>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: SourceRef) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }
}

impl Parameters for ParameterSet {
    fn set_field(&mut self, name: &str, value: &ParamValue) -> ConfigResult<()> {
        match self.values.get_mut(name) {
            None => {
                self.values.insert(name.to_string(), value.clone());
            }
            Some(existing) => {
                *existing = match (&*existing, value) {
                    (ParamValue::Float(_), ParamValue::Int(v)) => ParamValue::Float(*v as f64),
                    (current, new) if current.kind() == new.kind() => new.clone(),
                    (current, new) => {
                        return Err(ConfigError::TypeMismatch {
                            field: name.to_string(),
                            expected: current.kind().to_string(),
                            found: new.kind().to_string(),
                        })
                    }
                };
            }
        }
        Ok(())
    }

    fn source(&self) -> Option<&SourceRef> {
        self.source.as_ref()
    }

    fn model_id(&self) -> Option<&Key> {
        self.model_id.as_ref()
    }

    fn set_model_id(&mut self, key: Key) {
        self.model_id = Some(key);
    }
}
