//! Error types for the runtime crate.

use thiserror::Error;

/// Result type for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Runtime error types.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Extension not present in the catalog.
    #[error("Extension not found: {0}")]
    NotFound(String),

    /// Extension has no live instance.
    #[error("Extension not loaded: {0}")]
    NotLoaded(String),

    /// Archive could not be read or extracted.
    #[error("Archive error: {0}")]
    Archive(String),

    /// Installation failed. Carries the collected error list.
    #[error("Install failed: {}", .0.join("; "))]
    Install(Vec<String>),

    /// No route matches the request.
    #[error("No extension route matches {method} {path}")]
    RouteNotFound { method: String, path: String },

    /// Core error.
    #[error(transparent)]
    Core(#[from] portico_core::Error),

    /// Storage error.
    #[error(transparent)]
    Storage(#[from] portico_storage::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Zip error.
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}
