//! Plugin trait and the explicit factory registration table.
//!
//! Uploaded archives carry only declarative manifests and assets;
//! executable behavior comes exclusively from controller factories the
//! host registered at startup. The loader resolves a manifest's declared
//! `backend.controller_name` against this table and degrades to
//! [`StubPlugin`] when nothing is registered, so a broken extension is
//! inert rather than fatal.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::bus::{EventHandler, DEFAULT_HANDLER_PRIORITY};
use crate::error::{Error, Result};
use crate::event::Event;

/// One event handler a plugin wants registered on the bus.
pub struct EventHandlerSpec {
    /// Topic name or single-segment wildcard pattern.
    pub topic: String,
    /// Dispatch priority; lower runs earlier.
    pub priority: i32,
    /// Fire-and-forget dispatch.
    pub run_async: bool,
    /// The handler callback.
    pub handler: EventHandler,
}

impl EventHandlerSpec {
    /// Create a spec with default priority, synchronous dispatch.
    pub fn new(topic: impl Into<String>, handler: EventHandler) -> Self {
        Self {
            topic: topic.into(),
            priority: DEFAULT_HANDLER_PRIORITY,
            run_async: false,
            handler,
        }
    }

    /// Set the dispatch priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Mark the handler fire-and-forget.
    pub fn fire_and_forget(mut self) -> Self {
        self.run_async = true;
        self
    }
}

/// Context handed to a factory when instantiating a plugin.
#[derive(Debug, Clone)]
pub struct PluginContext {
    /// Catalog id of the extension.
    pub extension_id: String,
    /// Stable slug.
    pub slug: String,
    /// Current configuration blob.
    pub config: serde_json::Value,
}

/// A live plugin instance.
///
/// Lifecycle order: `on_enable` at load, then the loader registers
/// [`ExtensionPlugin::event_handlers`] and bridges declared manifest
/// subscriptions to [`ExtensionPlugin::on_event`]; `on_disable` at
/// unload, after which the loader tears down every bus handler owned by
/// the extension.
#[async_trait]
pub trait ExtensionPlugin: Send + Sync {
    /// Called once when the extension is loaded.
    async fn on_enable(&self) -> Result<()> {
        Ok(())
    }

    /// Explicit handler registrations for the event bus.
    fn event_handlers(&self) -> Vec<EventHandlerSpec> {
        Vec::new()
    }

    /// Receives events for manifest-declared subscriptions that have no
    /// dedicated handler in [`ExtensionPlugin::event_handlers`].
    async fn on_event(&self, _event: Event) -> Result<()> {
        Ok(())
    }

    /// Dispatch a declared HTTP route into the plugin.
    async fn handle_route(
        &self,
        handler: &str,
        _args: serde_json::Value,
    ) -> Result<serde_json::Value> {
        Err(Error::HandlerNotSupported(handler.to_string()))
    }

    /// Called once when the extension is unloaded.
    async fn on_disable(&self) -> Result<()> {
        Ok(())
    }
}

/// Inert fallback used when an extension's controller cannot be
/// resolved: no event handlers, route calls answer with a typed error.
pub struct StubPlugin {
    slug: String,
}

impl StubPlugin {
    /// Create a stub for the given extension slug.
    pub fn new(slug: impl Into<String>) -> Self {
        Self { slug: slug.into() }
    }

    /// The extension this stub stands in for.
    pub fn slug(&self) -> &str {
        &self.slug
    }
}

#[async_trait]
impl ExtensionPlugin for StubPlugin {
    async fn handle_route(
        &self,
        handler: &str,
        _args: serde_json::Value,
    ) -> Result<serde_json::Value> {
        Err(Error::Plugin(format!(
            "extension '{}' has no loaded controller (stub); cannot invoke '{}'",
            self.slug, handler
        )))
    }
}

/// Factory producing a plugin instance from its context.
pub type PluginFactory = Arc<dyn Fn(PluginContext) -> Box<dyn ExtensionPlugin> + Send + Sync>;

/// The explicit registration table mapping a manifest's declared
/// controller name to a host-registered factory.
#[derive(Default)]
pub struct PluginFactoryRegistry {
    factories: RwLock<HashMap<String, PluginFactory>>,
}

impl PluginFactoryRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under a controller name. Replaces any previous
    /// registration with the same name.
    pub fn register(&self, controller: impl Into<String>, factory: PluginFactory) {
        let controller = controller.into();
        tracing::debug!(controller = %controller, "registering plugin factory");
        self.factories.write().insert(controller, factory);
    }

    /// Register a factory from a plain closure.
    pub fn register_fn<F>(&self, controller: impl Into<String>, factory: F)
    where
        F: Fn(PluginContext) -> Box<dyn ExtensionPlugin> + Send + Sync + 'static,
    {
        self.register(controller, Arc::new(factory));
    }

    /// Whether a controller name is registered.
    pub fn contains(&self, controller: &str) -> bool {
        self.factories.read().contains_key(controller)
    }

    /// Instantiate a plugin for the given controller name.
    pub fn create(&self, controller: &str, context: PluginContext) -> Result<Box<dyn ExtensionPlugin>> {
        let factory = self
            .factories
            .read()
            .get(controller)
            .cloned()
            .ok_or_else(|| Error::FactoryNotRegistered(controller.to_string()))?;
        Ok(factory(context))
    }

    /// Registered controller names.
    pub fn controllers(&self) -> Vec<String> {
        self.factories.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullPlugin;

    #[async_trait]
    impl ExtensionPlugin for NullPlugin {}

    #[tokio::test]
    async fn test_factory_registry_create() {
        let registry = PluginFactoryRegistry::new();
        registry.register_fn("NullController", |_ctx| Box::new(NullPlugin));

        assert!(registry.contains("NullController"));
        let context = PluginContext {
            extension_id: "id".into(),
            slug: "null".into(),
            config: serde_json::Value::Null,
        };
        assert!(registry.create("NullController", context.clone()).is_ok());
        assert!(matches!(
            registry.create("Missing", context),
            Err(Error::FactoryNotRegistered(_))
        ));
    }

    #[tokio::test]
    async fn test_stub_plugin_rejects_routes() {
        let stub = StubPlugin::new("broken-ext");
        let result = stub.handle_route("handle", serde_json::Value::Null).await;
        assert!(result.is_err());
        assert!(stub.event_handlers().is_empty());
    }

    #[tokio::test]
    async fn test_default_lifecycle_hooks_succeed() {
        let plugin = NullPlugin;
        assert!(plugin.on_enable().await.is_ok());
        assert!(plugin
            .on_event(Event::new("a.b", serde_json::Value::Null))
            .await
            .is_ok());
        assert!(plugin.on_disable().await.is_ok());
    }
}
