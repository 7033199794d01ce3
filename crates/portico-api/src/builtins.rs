//! Built-in controller registration.
//!
//! Controllers ship with the host and are registered into the factory
//! table at startup; an uploaded extension binds to one by declaring its
//! name in `manifest.backend.controller_name`. Uploaded archives never
//! contribute executable code themselves.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use portico_core::bus::handler_fn;
use portico_core::{
    Event, EventHandlerSpec, ExtensionPlugin, PluginContext, PluginFactoryRegistry,
};

/// Register every built-in controller.
pub fn register_builtin_factories(factories: &PluginFactoryRegistry) {
    factories.register_fn("WelcomeEmailController", |context| {
        Box::new(WelcomeEmailPlugin::new(context))
    });
    tracing::debug!("built-in controllers registered");
}

/// Greets newly registered users.
///
/// Subscribes to `auth.after_register` and hands the message to the
/// host's mail pipeline (out of scope here, represented by a log line
/// and a counter the status route exposes).
pub struct WelcomeEmailPlugin {
    slug: String,
    config: serde_json::Value,
    sent: Arc<AtomicU64>,
}

impl WelcomeEmailPlugin {
    fn new(context: PluginContext) -> Self {
        Self {
            slug: context.slug,
            config: context.config,
            sent: Arc::new(AtomicU64::new(0)),
        }
    }

    fn subject(&self) -> String {
        self.config
            .get("subject")
            .and_then(|value| value.as_str())
            .unwrap_or("Welcome!")
            .to_string()
    }
}

#[async_trait]
impl ExtensionPlugin for WelcomeEmailPlugin {
    async fn on_enable(&self) -> portico_core::Result<()> {
        tracing::info!(slug = %self.slug, "welcome email plugin enabled");
        Ok(())
    }

    fn event_handlers(&self) -> Vec<EventHandlerSpec> {
        let sent = self.sent.clone();
        let subject = self.subject();
        let slug = self.slug.clone();

        vec![EventHandlerSpec::new(
            "auth.after_register",
            handler_fn(move |event: Event| {
                let sent = sent.clone();
                let subject = subject.clone();
                let slug = slug.clone();
                async move {
                    let user = event
                        .payload
                        .get("email")
                        .or_else(|| event.payload.get("user_id"))
                        .cloned()
                        .unwrap_or(serde_json::Value::Null);
                    tracing::info!(
                        slug = %slug,
                        subject = %subject,
                        user = %user,
                        "queueing welcome email"
                    );
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
            "status" => Ok(serde_json::json!({
                "slug": self.slug,
                "sent": self.sent.load(Ordering::SeqCst),
            })),
            other => Err(portico_core::Error::HandlerNotSupported(other.to_string())),
        }
    }

    async fn on_disable(&self) -> portico_core::Result<()> {
        tracing::info!(slug = %self.slug, sent = self.sent.load(Ordering::SeqCst), "welcome email plugin disabled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portico_core::bus::SubscribeOptions;
    use portico_core::EventBus;

    #[tokio::test]
    async fn test_welcome_email_counts_registrations() {
        let factories = PluginFactoryRegistry::new();
        register_builtin_factories(&factories);

        let plugin = factories
            .create(
                "WelcomeEmailController",
                PluginContext {
                    extension_id: "id".into(),
                    slug: "welcome-email".into(),
                    config: serde_json::json!({"subject": "Hi there"}),
                },
            )
            .unwrap();

        let bus = EventBus::new();
        for spec in plugin.event_handlers() {
            bus.subscribe(spec.topic, spec.handler, SubscribeOptions::default());
        }

        bus.publish(
            "auth.after_register",
            serde_json::json!({"email": "a@example.com"}),
        )
        .await;
        bus.publish("auth.after_register", serde_json::json!({"user_id": 7}))
            .await;

        let status = plugin
            .handle_route("status", serde_json::Value::Null)
            .await
            .unwrap();
        assert_eq!(status["sent"], 2);
    }
}
