//! Server state and router assembly.

pub mod router;

use std::sync::Arc;

use anyhow::Context;

use portico_core::{EventBus, PluginFactoryRegistry};
use portico_runtime::{ExtensionInstaller, ExtensionRouter, PluginLoader, RuntimePaths};
use portico_storage::{CatalogStore, EventLogStore};

pub use router::create_router;

/// Maximum accepted upload size (64 MiB).
pub const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct ServerState {
    pub bus: EventBus,
    pub catalog: Arc<CatalogStore>,
    pub event_log: Arc<EventLogStore>,
    pub loader: Arc<PluginLoader>,
    pub installer: Arc<ExtensionInstaller>,
    pub router: Arc<ExtensionRouter>,
}

impl ServerState {
    /// Wire up the full runtime over a data directory: stores, bus with
    /// its durable log sink, loader, installer, and route table.
    pub fn new(paths: RuntimePaths, factories: Arc<PluginFactoryRegistry>) -> anyhow::Result<Self> {
        paths.ensure().context("failed to create data directories")?;

        let bus = EventBus::with_name("portico");
        let catalog = Arc::new(
            CatalogStore::open(paths.catalog_db()).context("failed to open extension catalog")?,
        );
        let event_log = Arc::new(
            EventLogStore::open(paths.event_log_db()).context("failed to open event log")?,
        );
        bus.set_log_sink(event_log.clone());

        let loader = Arc::new(PluginLoader::new(
            bus.clone(),
            catalog.clone(),
            factories.clone(),
        ));
        let installer = Arc::new(ExtensionInstaller::new(
            bus.clone(),
            catalog.clone(),
            loader.clone(),
            factories,
            paths,
        ));
        let router = Arc::new(ExtensionRouter::new(catalog.clone(), loader.clone()));

        Ok(Self {
            bus,
            catalog,
            event_log,
            loader,
            installer,
            router,
        })
    }

    /// Startup sweep: load every enabled extension and build the route
    /// table. Individual failures are logged, never fatal.
    pub async fn startup(&self) {
        let loaded = self.loader.load_all_enabled().await;
        match self.router.rebuild() {
            Ok(routes) => {
                tracing::info!(loaded, routes, "extension runtime started");
            }
            Err(error) => {
                tracing::error!(error = %error, "failed to build extension route table");
            }
        }
        self.bus
            .publish_from("host", "system.startup", serde_json::json!({"loaded": loaded}))
            .await;
    }

    /// Shutdown path: unload every live instance so plugins run their
    /// teardown hooks.
    pub async fn shutdown(&self) {
        self.loader.unload_all().await;
        tracing::info!("extension runtime stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins;
    use crate::handlers::extensions::{disable_extension, enable_extension};
    use std::io::{Cursor, Write};

    fn build_archive(manifest: &serde_json::Value) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            let options = zip::write::SimpleFileOptions::default();
            writer.start_file("manifest.json", options).unwrap();
            writer.write_all(manifest.to_string().as_bytes()).unwrap();
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    fn state() -> (tempfile::TempDir, ServerState) {
        let dir = tempfile::tempdir().unwrap();
        let factories = Arc::new(PluginFactoryRegistry::new());
        builtins::register_builtin_factories(&factories);
        let state =
            ServerState::new(RuntimePaths::new(dir.path().join("data")), factories).unwrap();
        (dir, state)
    }

    #[tokio::test]
    async fn test_enable_disable_flow() {
        let (_dir, state) = state();
        let archive = build_archive(&serde_json::json!({
            "name": "welcome-email",
            "version": "1.0.0",
            "type": "auth",
            "events": {"subscribes": ["auth.after_register"]},
            "backend": {"enabled": true, "controller_name": "WelcomeEmailController"}
        }));

        let outcome = state
            .installer
            .install(&archive, "Welcome Email", portico_core::ExtensionType::Auth, None)
            .await;
        assert!(outcome.success, "{:?}", outcome.errors);
        let id = outcome.extension_id.unwrap();

        let record = enable_extension(&state, &id).await.unwrap();
        assert!(record.enabled);
        assert!(state.loader.is_loaded(&id).await);

        let report = state
            .bus
            .publish("auth.after_register", serde_json::json!({"user": "u1"}))
            .await;
        assert!(report.success());
        assert!(report.handlers_executed >= 1);

        disable_extension(&state, &id).await.unwrap();
        assert!(!state.loader.is_loaded(&id).await);
        assert_eq!(
            state
                .bus
                .list_handlers()
                .iter()
                .filter(|h| h.owner.as_deref() == Some(id.as_str()))
                .count(),
            0
        );
    }

    #[tokio::test]
    async fn test_startup_restores_enabled_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let paths = RuntimePaths::new(dir.path().join("data"));

        let id = {
            let factories = Arc::new(PluginFactoryRegistry::new());
            builtins::register_builtin_factories(&factories);
            let state = ServerState::new(paths.clone(), factories).unwrap();
            let archive = build_archive(&serde_json::json!({
                "name": "welcome-email",
                "version": "1.0.0",
                "backend": {"enabled": true, "controller_name": "WelcomeEmailController"}
            }));
            let outcome = state
                .installer
                .install(&archive, "Welcome Email", portico_core::ExtensionType::Auth, None)
                .await;
            let id = outcome.extension_id.unwrap();
            state.catalog.enable(&id).unwrap();
            id
        };

        // A fresh state over the same data directory simulates a restart.
        let factories = Arc::new(PluginFactoryRegistry::new());
        builtins::register_builtin_factories(&factories);
        let state = ServerState::new(paths, factories).unwrap();
        state.startup().await;
        assert!(state.loader.is_loaded(&id).await);
    }
}
