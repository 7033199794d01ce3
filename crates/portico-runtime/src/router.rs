//! Extension route table.
//!
//! Every enabled extension may declare HTTP routes in its manifest. The
//! table is rebuilt from the catalog (never discovered by scanning at
//! request time), collisions are surfaced instead of silently shadowing,
//! and resolution tries an exact match before falling back to the
//! longest registered prefix for nested paths.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use portico_core::ExtensionManifest;
use portico_storage::{CatalogStore, ExtensionRecord};

use crate::error::{Result, RuntimeError};
use crate::loader::PluginLoader;

/// One registered route.
#[derive(Debug, Clone)]
pub struct RouteBinding {
    /// HTTP method, uppercased.
    pub method: String,
    /// Declared route path.
    pub path: String,
    /// Owning extension id.
    pub extension_id: String,
    /// Owning extension slug.
    pub slug: String,
    /// Handler method name on the controller.
    pub handler: String,
}

type RouteKey = (String, String);

/// Dispatch table from declared routes to loaded extension handlers.
pub struct ExtensionRouter {
    catalog: Arc<CatalogStore>,
    loader: Arc<PluginLoader>,
    table: RwLock<HashMap<RouteKey, RouteBinding>>,
}

impl ExtensionRouter {
    /// Create a router over the catalog and loader.
    pub fn new(catalog: Arc<CatalogStore>, loader: Arc<PluginLoader>) -> Self {
        Self {
            catalog,
            loader,
            table: RwLock::new(HashMap::new()),
        }
    }

    /// Rebuild the table from every enabled extension with declared
    /// routes. On collision the first registration wins and a warning is
    /// logged. Returns the number of routes registered.
    pub fn rebuild(&self) -> Result<usize> {
        let records = self.catalog.find_enabled()?;

        let mut table = HashMap::new();
        for record in &records {
            collect_routes(&mut table, record);
        }

        let count = table.len();
        *self.table.write() = table;
        tracing::debug!(routes = count, "extension route table rebuilt");
        Ok(count)
    }

    /// Refresh the entries of a single extension (e.g. after a config
    /// update or re-install).
    pub fn reload_extension(&self, slug: &str) -> Result<()> {
        let record = self.catalog.find_by_slug(slug)?;

        let mut table = self.table.write();
        table.retain(|_, binding| binding.slug != slug);
        if let Some(record) = record {
            if record.enabled {
                collect_routes(&mut table, &record);
            }
        }
        Ok(())
    }

    /// Resolve a request to a route binding: exact match first, then the
    /// longest registered prefix with the same method.
    pub fn resolve(&self, method: &str, path: &str) -> Option<RouteBinding> {
        let method = method.to_uppercase();
        let table = self.table.read();

        if let Some(binding) = table.get(&(method.clone(), path.to_string())) {
            return Some(binding.clone());
        }

        table
            .values()
            .filter(|binding| binding.method == method && is_prefix_of(&binding.path, path))
            .max_by_key(|binding| binding.path.len())
            .cloned()
    }

    /// Invoke a handler method on a loaded extension.
    pub async fn invoke(
        &self,
        slug: &str,
        handler: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let instance = self
            .loader
            .instance_by_slug(slug)
            .await
            .ok_or_else(|| RuntimeError::NotLoaded(slug.to_string()))?;

        let result = instance.plugin().handle_route(handler, args).await?;
        Ok(result)
    }

    /// Resolve and invoke in one step.
    pub async fn dispatch(
        &self,
        method: &str,
        path: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let binding = self
            .resolve(method, path)
            .ok_or_else(|| RuntimeError::RouteNotFound {
                method: method.to_string(),
                path: path.to_string(),
            })?;
        self.invoke(&binding.slug, &binding.handler, args).await
    }

    /// All registered bindings.
    pub fn routes(&self) -> Vec<RouteBinding> {
        self.table.read().values().cloned().collect()
    }
}

fn collect_routes(table: &mut HashMap<RouteKey, RouteBinding>, record: &ExtensionRecord) {
    let manifest: ExtensionManifest = match serde_json::from_value(record.manifest.clone()) {
        Ok(manifest) => manifest,
        Err(_) => return,
    };
    if !manifest.backend.enabled {
        return;
    }

    for route in &manifest.backend.routes {
        let key = (route.method.to_uppercase(), route.path.clone());
        if let Some(existing) = table.get(&key) {
            tracing::warn!(
                method = %key.0,
                path = %key.1,
                winner = %existing.slug,
                loser = %record.slug,
                "route collision, keeping first registration"
            );
            continue;
        }
        table.insert(
            key.clone(),
            RouteBinding {
                method: key.0,
                path: key.1,
                extension_id: record.id.clone(),
                slug: record.slug.clone(),
                handler: route.handler_name().to_string(),
            },
        );
    }
}

/// Prefix match with a path-segment boundary: `/webhooks` is a prefix of
/// `/webhooks/stripe` but not of `/webhooksx`.
fn is_prefix_of(registered: &str, requested: &str) -> bool {
    if !requested.starts_with(registered) {
        return false;
    }
    requested.len() == registered.len()
        || registered.ends_with('/')
        || requested.as_bytes().get(registered.len()) == Some(&b'/')
}

#[cfg(test)]
mod tests {
    use super::*;
    use portico_core::{EventBus, ExtensionType, PluginFactoryRegistry};
    use portico_storage::ExtensionRecord;

    fn routed_manifest(routes: serde_json::Value) -> serde_json::Value {
        serde_json::json!({
            "name": "routed",
            "version": "1.0.0",
            "backend": {
                "enabled": true,
                "controller_name": "RoutedController",
                "routes": routes
            }
        })
    }

    fn setup() -> (tempfile::TempDir, Arc<CatalogStore>, ExtensionRouter) {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(CatalogStore::open(dir.path().join("catalog.redb")).unwrap());
        let loader = Arc::new(PluginLoader::new(
            EventBus::new(),
            catalog.clone(),
            Arc::new(PluginFactoryRegistry::new()),
        ));
        let router = ExtensionRouter::new(catalog.clone(), loader);
        (dir, catalog, router)
    }

    fn register_enabled(catalog: &CatalogStore, slug: &str, manifest: serde_json::Value) {
        let record = ExtensionRecord::new(slug, slug, "1.0.0", ExtensionType::Api)
            .with_manifest(manifest);
        let record = catalog.register(&record).unwrap();
        catalog.enable(&record.id).unwrap();
    }

    #[test]
    fn test_rebuild_and_exact_resolve() {
        let (_dir, catalog, router) = setup();
        register_enabled(
            &catalog,
            "hooks",
            routed_manifest(serde_json::json!([
                {"method": "post", "path": "/webhooks/stripe", "handler": "on_webhook"},
                {"method": "GET", "path": "/webhooks/status"}
            ])),
        );

        assert_eq!(router.rebuild().unwrap(), 2);

        let binding = router.resolve("POST", "/webhooks/stripe").unwrap();
        assert_eq!(binding.slug, "hooks");
        assert_eq!(binding.handler, "on_webhook");
        assert_eq!(router.resolve("GET", "/webhooks/status").unwrap().handler, "handle");
        assert!(router.resolve("DELETE", "/webhooks/stripe").is_none());
    }

    #[test]
    fn test_longest_prefix_fallback() {
        let (_dir, catalog, router) = setup();
        register_enabled(
            &catalog,
            "hooks",
            routed_manifest(serde_json::json!([
                {"method": "POST", "path": "/webhooks"},
                {"method": "POST", "path": "/webhooks/stripe"}
            ])),
        );
        router.rebuild().unwrap();

        let binding = router.resolve("POST", "/webhooks/stripe/events").unwrap();
        assert_eq!(binding.path, "/webhooks/stripe");

        assert!(router.resolve("POST", "/webhooksx").is_none());
    }

    #[test]
    fn test_collision_keeps_first() {
        let (_dir, catalog, router) = setup();
        register_enabled(
            &catalog,
            "first",
            routed_manifest(serde_json::json!([{"method": "GET", "path": "/shared"}])),
        );
        register_enabled(
            &catalog,
            "second",
            routed_manifest(serde_json::json!([{"method": "GET", "path": "/shared"}])),
        );
        assert_eq!(router.rebuild().unwrap(), 1);

        let binding = router.resolve("GET", "/shared").unwrap();
        assert_eq!(binding.slug, "first");
    }

    #[test]
    fn test_disabled_extensions_are_excluded() {
        let (_dir, catalog, router) = setup();
        let record = ExtensionRecord::new("off", "off", "1.0.0", ExtensionType::Api)
            .with_manifest(routed_manifest(serde_json::json!([
                {"method": "GET", "path": "/off"}
            ])));
        catalog.register(&record).unwrap();

        assert_eq!(router.rebuild().unwrap(), 0);
        assert!(router.resolve("GET", "/off").is_none());
    }

    #[test]
    fn test_reload_extension_drops_stale_routes() {
        let (_dir, catalog, router) = setup();
        register_enabled(
            &catalog,
            "hooks",
            routed_manifest(serde_json::json!([{"method": "GET", "path": "/old"}])),
        );
        router.rebuild().unwrap();
        assert!(router.resolve("GET", "/old").is_some());

        let record = catalog.find_by_slug("hooks").unwrap().unwrap();
        catalog
            .update(
                &record.id,
                portico_storage::ExtensionUpdate {
                    manifest: Some(routed_manifest(serde_json::json!([
                        {"method": "GET", "path": "/new"}
                    ]))),
                    ..Default::default()
                },
            )
            .unwrap();

        router.reload_extension("hooks").unwrap();
        assert!(router.resolve("GET", "/old").is_none());
        assert!(router.resolve("GET", "/new").is_some());
    }

    #[tokio::test]
    async fn test_invoke_requires_loaded_instance() {
        let (_dir, _catalog, router) = setup();
        let result = router.invoke("ghost", "handle", serde_json::Value::Null).await;
        assert!(matches!(result, Err(RuntimeError::NotLoaded(_))));
    }
}
