//! Runtime services of the Portico extension subsystem.
//!
//! Three collaborators around the catalog and the event bus:
//!
//! - [`installer::ExtensionInstaller`] turns an uploaded zip archive into
//!   extracted assets plus a catalog row;
//! - [`loader::PluginLoader`] turns catalog rows into live, event-bound
//!   plugin instances;
//! - [`router::ExtensionRouter`] dispatches inbound HTTP calls to the
//!   declared routes of loaded extensions.

pub mod error;
pub mod installer;
pub mod loader;
pub mod paths;
pub mod router;

pub use error::{Result, RuntimeError};
pub use installer::{ExtensionInstaller, InstallOutcome};
pub use loader::{PluginInstance, PluginLoader};
pub use paths::RuntimePaths;
pub use router::{ExtensionRouter, RouteBinding};
