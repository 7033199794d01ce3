//! End-to-end install → enable → dispatch scenarios.

use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use portico_core::bus::handler_fn;
use portico_core::{
    Event, EventBus, EventHandlerSpec, ExtensionPlugin, ExtensionType, PluginFactoryRegistry,
};
use portico_runtime::{ExtensionInstaller, ExtensionRouter, PluginLoader, RuntimePaths};
use portico_storage::{CatalogStore, EventLogStore};

fn build_archive(files: &[(&str, &str)]) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut cursor);
        let options = zip::write::SimpleFileOptions::default();
        for (name, content) in files {
            writer.start_file(*name, options).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }
    cursor.into_inner()
}

/// Host-registered controller standing in for a real welcome-email
/// integration: counts registration events and answers a status route.
struct WelcomeEmailPlugin {
    sent: Arc<AtomicUsize>,
}

#[async_trait]
impl ExtensionPlugin for WelcomeEmailPlugin {
    fn event_handlers(&self) -> Vec<EventHandlerSpec> {
        let sent = self.sent.clone();
        vec![EventHandlerSpec::new(
            "auth.after_register",
            handler_fn(move |_event| {
                let sent = sent.clone();
                async move {
                    sent.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        )]
    }

    async fn handle_route(
        &self,
        handler: &str,
        _args: serde_json::Value,
    ) -> portico_core::Result<serde_json::Value> {
        match handler {
            "status" => Ok(serde_json::json!({"sent": self.sent.load(Ordering::SeqCst)})),
            other => Err(portico_core::Error::HandlerNotSupported(other.to_string())),
        }
    }

    async fn on_event(&self, _event: Event) -> portico_core::Result<()> {
        Ok(())
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    bus: EventBus,
    catalog: Arc<CatalogStore>,
    loader: Arc<PluginLoader>,
    installer: ExtensionInstaller,
    router: ExtensionRouter,
    sent: Arc<AtomicUsize>,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let paths = RuntimePaths::new(dir.path().join("data"));
    paths.ensure().unwrap();

    let bus = EventBus::new();
    let event_log = Arc::new(EventLogStore::open(paths.event_log_db()).unwrap());
    bus.set_log_sink(event_log);

    let catalog = Arc::new(CatalogStore::open(paths.catalog_db()).unwrap());
    let factories = Arc::new(PluginFactoryRegistry::new());
    let sent = Arc::new(AtomicUsize::new(0));
    let sent_for_factory = sent.clone();
    factories.register_fn("WelcomeEmailController", move |_ctx| {
        Box::new(WelcomeEmailPlugin {
            sent: sent_for_factory.clone(),
        })
    });

    let loader = Arc::new(PluginLoader::new(
        bus.clone(),
        catalog.clone(),
        factories.clone(),
    ));
    let installer = ExtensionInstaller::new(
        bus.clone(),
        catalog.clone(),
        loader.clone(),
        factories,
        paths,
    );
    let router = ExtensionRouter::new(catalog.clone(), loader.clone());

    Harness {
        _dir: dir,
        bus,
        catalog,
        loader,
        installer,
        router,
        sent,
    }
}

fn welcome_email_archive() -> Vec<u8> {
    build_archive(&[(
        "manifest.json",
        &serde_json::json!({
            "name": "welcome-email",
            "version": "1.0.0",
            "type": "auth",
            "events": {"subscribes": ["auth.after_register"]},
            "backend": {
                "enabled": true,
                "controller_name": "WelcomeEmailController",
                "routes": [{"method": "GET", "path": "/welcome-email/status", "handler": "status"}]
            }
        })
        .to_string(),
    )])
}

#[tokio::test]
async fn upload_enable_and_receive_domain_events() {
    let hx = harness();

    let outcome = hx
        .installer
        .install(
            &welcome_email_archive(),
            "Welcome Email",
            ExtensionType::Auth,
            None,
        )
        .await;
    assert!(outcome.success, "{:?}", outcome.errors);

    // Catalog row exists with the manifest-derived slug and is disabled
    // by default.
    let record = hx.catalog.find_by_slug("welcome-email").unwrap().unwrap();
    assert!(!record.enabled);

    // Events published before enabling do not reach the extension.
    hx.bus
        .publish("auth.after_register", serde_json::json!({"user": "a"}))
        .await;
    assert_eq!(hx.sent.load(Ordering::SeqCst), 0);

    // Enable: persist the flag, load the instance.
    let record = hx.catalog.enable(&record.id).unwrap();
    let instance = hx.loader.load(&record).await.unwrap();
    assert!(!instance.stub);

    let report = hx
        .bus
        .publish("auth.after_register", serde_json::json!({"user": "b"}))
        .await;
    assert!(report.success());
    assert_eq!(report.handlers_executed, 1);
    assert_eq!(hx.sent.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn upload_without_version_is_rejected_with_error_list() {
    let hx = harness();
    let archive = build_archive(&[(
        "manifest.json",
        &serde_json::json!({"name": "welcome-email"}).to_string(),
    )]);

    let outcome = hx
        .installer
        .install(&archive, "Welcome Email", ExtensionType::Auth, None)
        .await;
    assert!(!outcome.success);
    assert!(outcome
        .errors
        .contains(&"manifest.version is required".to_string()));
    assert!(hx.catalog.find_by_slug("welcome-email").unwrap().is_none());
}

#[tokio::test]
async fn disable_tears_down_every_owned_handler() {
    let hx = harness();
    let outcome = hx
        .installer
        .install(
            &welcome_email_archive(),
            "Welcome Email",
            ExtensionType::Auth,
            None,
        )
        .await;
    let id = outcome.extension_id.unwrap();

    let record = hx.catalog.enable(&id).unwrap();
    hx.loader.load(&record).await.unwrap();
    assert!(hx
        .bus
        .list_handlers()
        .iter()
        .any(|h| h.owner.as_deref() == Some(id.as_str())));

    hx.loader.unload(&id).await.unwrap();
    hx.catalog.disable(&id).unwrap();

    assert_eq!(
        hx.bus
            .list_handlers()
            .iter()
            .filter(|h| h.owner.as_deref() == Some(id.as_str()))
            .count(),
        0
    );
    hx.bus
        .publish("auth.after_register", serde_json::json!({}))
        .await;
    assert_eq!(hx.sent.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn declared_routes_dispatch_into_the_loaded_instance() {
    let hx = harness();
    let outcome = hx
        .installer
        .install(
            &welcome_email_archive(),
            "Welcome Email",
            ExtensionType::Auth,
            None,
        )
        .await;
    let id = outcome.extension_id.unwrap();

    let record = hx.catalog.enable(&id).unwrap();
    hx.loader.load(&record).await.unwrap();
    hx.router.rebuild().unwrap();

    hx.bus
        .publish("auth.after_register", serde_json::json!({}))
        .await;

    let result = hx
        .router
        .dispatch("GET", "/welcome-email/status", serde_json::Value::Null)
        .await
        .unwrap();
    assert_eq!(result, serde_json::json!({"sent": 1}));

    // Unknown handler names surface as typed errors, not panics.
    assert!(hx
        .router
        .invoke("welcome-email", "nope", serde_json::Value::Null)
        .await
        .is_err());
}

#[tokio::test]
async fn startup_sweep_restores_enabled_extensions() {
    let hx = harness();
    let outcome = hx
        .installer
        .install(
            &welcome_email_archive(),
            "Welcome Email",
            ExtensionType::Auth,
            None,
        )
        .await;
    let id = outcome.extension_id.unwrap();
    hx.catalog.enable(&id).unwrap();

    // Simulates host restart: a fresh loader over the same catalog.
    assert_eq!(hx.loader.load_all_enabled().await, 1);
    assert!(hx.loader.is_loaded(&id).await);

    hx.bus
        .publish("auth.after_register", serde_json::json!({}))
        .await;
    assert_eq!(hx.sent.load(Ordering::SeqCst), 1);
}
