//! Error types shared across the extension runtime.

use thiserror::Error;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types.
#[derive(Debug, Error)]
pub enum Error {
    /// The manifest failed validation. Carries the complete problem list.
    #[error("Invalid manifest: {}", .0.join("; "))]
    InvalidManifest(Vec<String>),

    /// A plugin factory was requested that is not registered with the host.
    #[error("No plugin factory registered for controller: {0}")]
    FactoryNotRegistered(String),

    /// A route handler method the plugin does not implement.
    #[error("Route handler not supported: {0}")]
    HandlerNotSupported(String),

    /// Plugin lifecycle or handler failure.
    #[error("Plugin error: {0}")]
    Plugin(String),

    /// Serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
