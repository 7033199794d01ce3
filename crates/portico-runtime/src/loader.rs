//! Plugin loader.
//!
//! Turns catalog entries into live, event-bound plugin instances. A
//! record whose controller cannot be resolved degrades to an inert stub
//! instead of crashing the host, and the startup sweep loads every
//! enabled extension independently so one broken extension never blocks
//! the rest.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;

use portico_core::bus::{handler_fn, SubscribeOptions};
use portico_core::{
    EventBus, ExtensionManifest, ExtensionPlugin, PluginContext, PluginFactoryRegistry, StubPlugin,
};
use portico_storage::{CatalogStore, ExtensionRecord};

use crate::error::{Result, RuntimeError};

/// A live plugin instance tracked by the loader.
pub struct PluginInstance {
    /// Catalog id of the extension.
    pub extension_id: String,
    /// Stable slug.
    pub slug: String,
    /// Whether this instance is the inert fallback stub.
    pub stub: bool,
    /// Load timestamp (unix seconds).
    pub loaded_at: i64,
    plugin: Arc<dyn ExtensionPlugin>,
}

impl PluginInstance {
    /// The plugin behind this instance.
    pub fn plugin(&self) -> Arc<dyn ExtensionPlugin> {
        self.plugin.clone()
    }
}

/// Loader of catalog entries into live instances.
pub struct PluginLoader {
    bus: EventBus,
    catalog: Arc<CatalogStore>,
    factories: Arc<PluginFactoryRegistry>,
    instances: RwLock<HashMap<String, Arc<PluginInstance>>>,
}

impl PluginLoader {
    /// Create a loader bound to the bus, catalog, and factory table.
    pub fn new(
        bus: EventBus,
        catalog: Arc<CatalogStore>,
        factories: Arc<PluginFactoryRegistry>,
    ) -> Self {
        Self {
            bus,
            catalog,
            factories,
            instances: RwLock::new(HashMap::new()),
        }
    }

    /// Load one extension.
    ///
    /// Idempotent: loading an already-loaded id returns the existing
    /// instance with a warning rather than double-loading. Lifecycle
    /// order: instantiate, `on_enable`, bind event handlers to the bus
    /// with the extension id as owner.
    pub async fn load(&self, record: &ExtensionRecord) -> Result<Arc<PluginInstance>> {
        {
            let instances = self.instances.read().await;
            if let Some(existing) = instances.get(&record.id) {
                tracing::warn!(slug = %record.slug, "extension already loaded, returning existing instance");
                return Ok(existing.clone());
            }
        }

        let manifest = parse_manifest(record);
        let context = PluginContext {
            extension_id: record.id.clone(),
            slug: record.slug.clone(),
            config: record.config.clone(),
        };

        let (mut plugin, mut stub) = self.instantiate(record, &manifest, context);

        if !stub {
            if let Err(error) = plugin.on_enable().await {
                tracing::error!(
                    slug = %record.slug,
                    error = %error,
                    "on_enable failed, degrading extension to stub"
                );
                plugin = Arc::new(StubPlugin::new(&record.slug));
                stub = true;
            }
        }

        let mut covered: HashSet<String> = HashSet::new();
        if !stub {
            for spec in plugin.event_handlers() {
                covered.insert(spec.topic.clone());
                let mut options = SubscribeOptions::default()
                    .with_priority(spec.priority)
                    .with_owner(&record.id)
                    .with_label(format!("{}:{}", record.slug, spec.topic));
                options.run_async = spec.run_async;
                self.bus.subscribe(spec.topic, spec.handler, options);
            }

            // Manifest-declared subscriptions without a dedicated handler
            // are bridged to the plugin's on_event hook.
            for topic in &record.subscriptions {
                if covered.contains(topic) {
                    continue;
                }
                let plugin_for_topic = plugin.clone();
                let handler = handler_fn(move |event| {
                    let plugin = plugin_for_topic.clone();
                    async move {
                        plugin.on_event(event).await?;
                        Ok(())
                    }
                });
                self.bus.subscribe(
                    topic.clone(),
                    handler,
                    SubscribeOptions::default()
                        .with_owner(&record.id)
                        .with_label(format!("{}:{}", record.slug, topic)),
                );
            }
        }

        let instance = Arc::new(PluginInstance {
            extension_id: record.id.clone(),
            slug: record.slug.clone(),
            stub,
            loaded_at: chrono::Utc::now().timestamp(),
            plugin,
        });

        self.instances
            .write()
            .await
            .insert(record.id.clone(), instance.clone());

        tracing::info!(slug = %record.slug, stub, "extension loaded");
        Ok(instance)
    }

    fn instantiate(
        &self,
        record: &ExtensionRecord,
        manifest: &ExtensionManifest,
        context: PluginContext,
    ) -> (Arc<dyn ExtensionPlugin>, bool) {
        if !manifest.backend.enabled {
            return (Arc::new(StubPlugin::new(&record.slug)), true);
        }

        let controller = match manifest.backend.controller_name.as_deref() {
            Some(name) => name,
            None => {
                tracing::warn!(slug = %record.slug, "backend enabled but no controller declared, using stub");
                return (Arc::new(StubPlugin::new(&record.slug)), true);
            }
        };

        match self.factories.create(controller, context) {
            Ok(plugin) => (Arc::from(plugin), false),
            Err(error) => {
                tracing::warn!(
                    slug = %record.slug,
                    controller,
                    error = %error,
                    "controller could not be instantiated, using stub"
                );
                (Arc::new(StubPlugin::new(&record.slug)), true)
            }
        }
    }

    /// Unload one extension: invoke `on_disable`, then remove every bus
    /// handler owned by its id, then drop the instance.
    pub async fn unload(&self, id: &str) -> Result<()> {
        let instance = self
            .instances
            .write()
            .await
            .remove(id)
            .ok_or_else(|| RuntimeError::NotLoaded(id.to_string()))?;

        if let Err(error) = instance.plugin.on_disable().await {
            tracing::warn!(slug = %instance.slug, error = %error, "on_disable failed");
        }

        // Teardown happens regardless of what on_disable did, so a plugin
        // that forgets its own cleanup still ends with zero handlers.
        let removed = self.bus.unsubscribe_owner(id);
        tracing::info!(slug = %instance.slug, handlers_removed = removed, "extension unloaded");
        Ok(())
    }

    /// Reload one extension from its current catalog record.
    pub async fn reload(&self, id: &str) -> Result<Arc<PluginInstance>> {
        let record = self
            .catalog
            .find_by_id(id)?
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;

        match self.unload(id).await {
            Ok(()) | Err(RuntimeError::NotLoaded(_)) => {}
            Err(error) => return Err(error),
        }
        self.load(&record).await
    }

    /// Whether an extension id has a live instance.
    pub async fn is_loaded(&self, id: &str) -> bool {
        self.instances.read().await.contains_key(id)
    }

    /// The live instance for an extension id.
    pub async fn instance(&self, id: &str) -> Option<Arc<PluginInstance>> {
        self.instances.read().await.get(id).cloned()
    }

    /// The live instance for a slug.
    pub async fn instance_by_slug(&self, slug: &str) -> Option<Arc<PluginInstance>> {
        self.instances
            .read()
            .await
            .values()
            .find(|instance| instance.slug == slug)
            .cloned()
    }

    /// Ids of all loaded extensions.
    pub async fn loaded_ids(&self) -> Vec<String> {
        self.instances.read().await.keys().cloned().collect()
    }

    /// Startup sweep: load every enabled catalog entry independently.
    /// One extension's failure is logged and skipped, never aborting the
    /// sweep. Returns the number of instances loaded.
    pub async fn load_all_enabled(&self) -> usize {
        let records = match self.catalog.find_enabled() {
            Ok(records) => records,
            Err(error) => {
                tracing::error!(error = %error, "failed to read enabled extensions from catalog");
                return 0;
            }
        };

        let mut loaded = 0;
        for record in records {
            match self.load(&record).await {
                Ok(_) => loaded += 1,
                Err(error) => {
                    tracing::warn!(
                        slug = %record.slug,
                        error = %error,
                        "failed to load extension during startup sweep, skipping"
                    );
                }
            }
        }
        loaded
    }

    /// Unload every live instance (shutdown path).
    pub async fn unload_all(&self) {
        let ids = self.loaded_ids().await;
        for id in ids {
            if let Err(error) = self.unload(&id).await {
                tracing::warn!(id = %id, error = %error, "failed to unload extension");
            }
        }
    }
}

fn parse_manifest(record: &ExtensionRecord) -> ExtensionManifest {
    if record.manifest.is_null() {
        return ExtensionManifest::default();
    }
    match serde_json::from_value(record.manifest.clone()) {
        Ok(manifest) => manifest,
        Err(error) => {
            tracing::warn!(slug = %record.slug, error = %error, "stored manifest is unreadable");
            ExtensionManifest::default()
        }
    }
}
