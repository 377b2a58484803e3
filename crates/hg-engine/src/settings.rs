//! Orchestrator settings.

use hg_store::JsonFileRepository;
use hg_types::{validation_error, HgResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const GRID_PREFIX_VAR: &str = "HYPERGRID_GRID_PREFIX";
pub const MODEL_INFIX_VAR: &str = "HYPERGRID_MODEL_INFIX";
pub const STORE_DIR_VAR: &str = "HYPERGRID_STORE_DIR";

/// Naming and storage settings for grid searches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    /// Leading segment of auto-derived grid keys.
    pub grid_prefix: String,

    /// Separator between a grid key and a model index in model keys.
    pub model_key_infix: String,

    /// Root of the file repository; `None` uses the platform data dir.
    pub store_dir: Option<PathBuf>,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            grid_prefix: "Search".to_string(),
            model_key_infix: "_model_".to_string(),
            store_dir: None,
        }
    }
}

impl SearchSettings {
    /// Defaults overlaid with `HYPERGRID_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();
        if let Some(prefix) = lookup(GRID_PREFIX_VAR) {
            settings.grid_prefix = prefix;
        }
        if let Some(infix) = lookup(MODEL_INFIX_VAR) {
            settings.model_key_infix = infix;
        }
        if let Some(dir) = lookup(STORE_DIR_VAR).filter(|dir| !dir.is_empty()) {
            settings.store_dir = Some(PathBuf::from(dir));
        }
        settings
    }

    pub fn store_dir(&self) -> PathBuf {
        self.store_dir
            .clone()
            .unwrap_or_else(JsonFileRepository::default_location)
    }

    pub fn validate(&self) -> HgResult<()> {
        if self.grid_prefix.trim().is_empty() {
            return Err(validation_error!("grid_prefix must not be empty"));
        }
        if self.model_key_infix.is_empty() {
            return Err(validation_error!("model_key_infix must not be empty"));
        }
        Ok(())
    }
}
