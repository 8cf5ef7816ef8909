//! Error types for the weaver

use std::path::PathBuf;
use thiserror::Error;

/// Result type for weaver operations
pub type Result<T> = std::result::Result<T, WeaveError>;

/// Weaver errors
///
/// These are the failures that abort a whole run. Everything that concerns
/// a single type or property is reported as a diagnostic instead.
#[derive(Error, Debug)]
pub enum WeaveError {
    #[error("Module not found: {name}")]
    ModuleNotFound { name: String },

    #[error("Failed to read module file: {path}")]
    ModuleRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid module format in {path}: {source}")]
    ModuleFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Root marker types could not be resolved: {missing:?}")]
    RootMarkersUnresolved { missing: Vec<String> },

    #[error("Failed to write output to {path}")]
    OutputWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
