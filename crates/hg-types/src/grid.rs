//! The grid: shared, resumable record of one hyperparameter search.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::keys::{Fingerprint, Key, SourceRef};
use crate::params::{FieldNaming, ParamValue, Parameters};

/// What was being attempted when a point failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", content = "inputs", rename_all = "snake_case")]
pub enum AttemptInputs {
    /// The candidate tuple could not be turned into a configuration; values
    /// follow the grid's hyperparameter name order.
    Raw(Vec<ParamValue>),
    /// The configuration was constructed but its build failed.
    Configured(Value),
}

/// One failed point of the search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedAttempt {
    pub inputs: AttemptInputs,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

/// Aggregate record of a search.
///
/// Created once per key and resumed afterwards: later searches append to
/// `models` and `failures`, they never replace them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    pub key: Key,
    pub model_name: String,
    /// Serialized base configuration every point derives from.
    pub base_params: Value,
    pub hyper_names: Vec<String>,
    pub field_naming: FieldNaming,
    pub source: Option<SourceRef>,
    models: BTreeMap<Fingerprint, Key>,
    failures: Vec<FailedAttempt>,
    attempts: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Grid {
    pub fn new<P: Parameters>(
        key: Key,
        base_params: &P,
        hyper_names: Vec<String>,
        model_name: impl Into<String>,
        field_naming: FieldNaming,
    ) -> Result<Self, serde_json::Error> {
        let now = Utc::now();
        Ok(Self {
            key,
            model_name: model_name.into(),
            base_params: serde_json::to_value(base_params)?,
            hyper_names,
            field_naming,
            source: base_params.source().cloned(),
            models: BTreeMap::new(),
            failures: Vec::new(),
            attempts: 0,
            created_at: now,
            updated_at: now,
        })
    }

    /// Decode the base configuration.
    pub fn base_params_as<P: Parameters>(&self) -> Result<P, serde_json::Error> {
        P::deserialize(&self.base_params)
    }

    /// Whether `source` is the source this grid was created over.
    pub fn same_source(&self, source: Option<&SourceRef>) -> bool {
        self.source.as_ref() == source
    }

    /// Key of the model already built for `fingerprint`.
    pub fn model_key(&self, fingerprint: &Fingerprint) -> Option<&Key> {
        self.models.get(fingerprint)
    }

    /// Record a built model. An existing entry is never overwritten; returns
    /// `false` if the fingerprint was already present.
    pub fn put_model(&mut self, fingerprint: Fingerprint, model: Key) -> bool {
        if self.models.contains_key(&fingerprint) {
            return false;
        }
        self.models.insert(fingerprint, model);
        self.touch();
        true
    }

    pub fn model_keys(&self) -> impl Iterator<Item = &Key> {
        self.models.values()
    }

    pub fn models(&self) -> &BTreeMap<Fingerprint, Key> {
        &self.models
    }

    /// Number of distinct models built.
    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    pub fn append_failure(&mut self, inputs: AttemptInputs, error: impl fmt::Display) {
        let now = Utc::now();
        self.failures.push(FailedAttempt {
            inputs,
            error: error.to_string(),
            failed_at: now,
        });
        self.updated_at = now;
    }

    pub fn failures(&self) -> &[FailedAttempt] {
        &self.failures
    }

    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    /// Candidate tuples that never became a configuration.
    pub fn failed_raw_params(&self) -> Vec<&[ParamValue]> {
        self.failures
            .iter()
            .filter_map(|f| match &f.inputs {
                AttemptInputs::Raw(values) => Some(values.as_slice()),
                AttemptInputs::Configured(_) => None,
            })
            .collect()
    }

    /// Configurations whose build failed, decoded as `P`.
    pub fn failed_parameters<P: Parameters>(&self) -> Result<Vec<P>, serde_json::Error> {
        self.failures
            .iter()
            .filter_map(|f| match &f.inputs {
                AttemptInputs::Configured(value) => Some(P::deserialize(value)),
                AttemptInputs::Raw(_) => None,
            })
            .collect()
    }

    /// Count one processed point, successful or not.
    pub fn record_attempt(&mut self) {
        self.attempts += 1;
        self.touch();
    }

    /// Points processed over the lifetime of the grid, across resumptions.
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParameterSet;

    fn sample_grid() -> Grid {
        let base = ParameterSet::new()
            .with("a", 1)
            .with_source(SourceRef::new("iris.hex", 42));
        Grid::new(
            Key::new("Search_gbm_iris"),
            &base,
            vec!["b".into(), "c".into()],
            "gbm",
            FieldNaming::Consistent,
        )
        .unwrap()
    }

    #[test]
    fn new_grid_captures_base_and_source() {
        let grid = sample_grid();
        assert_eq!(grid.source, Some(SourceRef::new("iris.hex", 42)));
        assert!(grid.same_source(Some(&SourceRef::new("iris.hex", 42))));
        assert!(!grid.same_source(Some(&SourceRef::new("iris.hex", 43))));
        assert!(!grid.same_source(None));

        let base: ParameterSet = grid.base_params_as().unwrap();
        assert_eq!(base.get("a"), Some(&ParamValue::Int(1)));
        assert_eq!(grid.model_count(), 0);
        assert_eq!(grid.attempts(), 0);
    }

    #[test]
    fn put_model_never_overwrites() {
        let mut grid = sample_grid();
        let fp = Fingerprint::of_json(&serde_json::json!({"b": 1}));

        assert!(grid.put_model(fp.clone(), Key::new("m_0")));
        assert!(!grid.put_model(fp.clone(), Key::new("m_1")));
        assert_eq!(grid.model_key(&fp), Some(&Key::new("m_0")));
        assert_eq!(grid.model_count(), 1);
    }

    #[test]
    fn failures_split_by_stage() {
        let mut grid = sample_grid();
        grid.append_failure(
            AttemptInputs::Raw(vec![ParamValue::Int(1), ParamValue::from("x")]),
            "type mismatch",
        );
        let failed = ParameterSet::new().with("a", 1).with("b", 2);
        grid.append_failure(
            AttemptInputs::Configured(serde_json::to_value(&failed).unwrap()),
            "build exploded",
        );

        assert_eq!(grid.failure_count(), 2);
        assert_eq!(grid.failed_raw_params().len(), 1);
        let decoded: Vec<ParameterSet> = grid.failed_parameters().unwrap();
        assert_eq!(decoded, vec![failed]);
        assert_eq!(grid.failures()[1].error, "build exploded");
    }

    #[test]
    fn grid_survives_json_roundtrip() {
        let mut grid = sample_grid();
        grid.put_model(Fingerprint::of_json(&serde_json::json!(1)), Key::new("m_0"));
        grid.record_attempt();

        let json = serde_json::to_string(&grid).unwrap();
        let back: Grid = serde_json::from_str(&json).unwrap();
        assert_eq!(back, grid);
        assert_eq!(back.attempts(), 1);
    }
}
