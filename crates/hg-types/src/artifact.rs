//! Record of a built artifact (a trained model).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::keys::Key;

/// Output of building one configuration. Opaque to the search apart from its
/// key; metrics are carried for callers ranking the grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub key: Key,
    pub model_name: String,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    pub built_at: DateTime<Utc>,
}

impl Artifact {
    pub fn new(key: Key, model_name: impl Into<String>) -> Self {
        Self {
            key,
            model_name: model_name.into(),
            metrics: BTreeMap::new(),
            built_at: Utc::now(),
        }
    }

    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }
}
