use thiserror::Error;

/// Main error type for the hypergrid system
#[derive(Error, Debug)]
pub enum HgError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Errors raised while materializing one point of the hyper space into a
/// concrete configuration.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Unknown field: {field}")]
    UnknownField { field: String },

    #[error("Type mismatch for field {field}: expected {expected}, found {found}")]
    TypeMismatch {
        field: String,
        expected: String,
        found: String,
    },

    #[error("Invalid value for field {field}: {message}")]
    InvalidValue { field: String, message: String },
}

/// Repository errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Entity not found: {key}")]
    NotFound { key: String },

    #[error("Entity already exists: {key}")]
    AlreadyExists { key: String },

    #[error("Entity {key} is a {existing} and cannot be replaced by a {incoming}")]
    KindMismatch {
        key: String,
        existing: String,
        incoming: String,
    },

    #[error("Entity {key} is locked by job {owner}")]
    Locked { key: String, owner: String },

    #[error("Entity {key} is not locked by job {owner}")]
    NotLocked { key: String, owner: String },

    #[error("Storage IO failure for {key}: {message}")]
    Io { key: String, message: String },

    #[error("Stored document for {key} is corrupt: {message}")]
    Corrupt { key: String, message: String },
}

/// Fatal conditions detected before a search loop starts
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Name conflict: tried to create a grid using the key of a non-grid object {key}; it is a {kind}")]
    NameConflict { key: String, kind: String },

    #[error("Key {key} resolved to the grid stored as {found}")]
    KeyMismatch { key: String, found: String },

    #[error("Cannot append new models to grid {key}: it was built over a different source")]
    SourceMismatch { key: String },

    #[error("The source being searched over must have a key")]
    MissingSource,

    #[error("Search job {job} ended abnormally: {message}")]
    Aborted { job: String, message: String },
}

/// Errors raised while building (or resolving) the artifact of one point
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BuildError {
    #[error("Model build failed: {message}")]
    Failed { message: String },

    #[error("Model build panicked: {message}")]
    Panicked { message: String },

    #[error("Model build was aborted before completion")]
    Aborted,

    #[error("Cached model {key} could not be resolved")]
    MissingArtifact { key: String },

    #[error("Model {key} could not be recorded: {message}")]
    Unrecorded { key: String, message: String },
}

impl BuildError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

/// Result type alias for hypergrid operations
pub type HgResult<T> = Result<T, HgError>;

/// Result alias for configuration construction
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result alias for repository operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::HgError::Validation(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = ConfigError::TypeMismatch {
            field: "ntrees".to_string(),
            expected: "int".to_string(),
            found: "text".to_string(),
        };

        assert!(error.to_string().contains("ntrees"));
        assert!(error.to_string().contains("expected int"));
        assert!(error.to_string().contains("found text"));
    }

    #[test]
    fn test_error_conversion() {
        let search_error = SearchError::SourceMismatch {
            key: "Search_gbm".to_string(),
        };
        let hg_error: HgError = search_error.into();

        match hg_error {
            HgError::Search(SearchError::SourceMismatch { .. }) => (),
            _ => panic!("Expected Search error"),
        }
    }

    #[test]
    fn store_io_failures_surface_as_store_errors() {
        let io = StoreError::Io {
            key: "Search_gbm".to_string(),
            message: "disk full".to_string(),
        };
        let hg_error: HgError = io.into();

        assert!(matches!(hg_error, HgError::Store(StoreError::Io { .. })));
        assert_eq!(
            hg_error.to_string(),
            "Store error: Storage IO failure for Search_gbm: disk full"
        );
    }

    #[test]
    fn test_macros() {
        let validation = validation_error!("Invalid value: {}", 42);
        assert!(matches!(validation, HgError::Validation(ref m) if m == "Invalid value: 42"));
    }
}
