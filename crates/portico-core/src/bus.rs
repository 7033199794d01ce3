//! In-memory publish/subscribe event bus.
//!
//! The bus is the central nervous system of the extension runtime. Domain
//! events published by the host (and by extensions) are dispatched to
//! subscribed handlers in ascending priority order, with per-handler
//! failure isolation: one throwing subscriber never aborts its siblings.
//!
//! Handlers subscribe against a topic pattern where `*` matches a single
//! dot-separated segment (see [`crate::topic`]). Handlers registered as
//! fire-and-forget are started but never awaited by the publisher.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use parking_lot::RwLock;

use crate::event::Event;
use crate::topic;

/// Default handler priority. Lower values run earlier.
pub const DEFAULT_HANDLER_PRIORITY: i32 = 100;

/// Handler callback type. Each invocation receives its own clone of the
/// event and resolves to a result captured by the dispatcher.
pub type EventHandler =
    Arc<dyn Fn(Event) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Filter predicate evaluated before a handler runs. A handler whose
/// filter returns `false` is skipped and not counted as executed.
pub type EventFilter = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

/// Wrap an async closure into an [`EventHandler`].
pub fn handler_fn<F, Fut>(f: F) -> EventHandler
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |event| Box::pin(f(event)))
}

/// Opaque handle identifying a registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

impl std::fmt::Display for HandlerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "handler-{}", self.0)
    }
}

/// Options controlling a subscription.
#[derive(Clone, Default)]
pub struct SubscribeOptions {
    /// Dispatch priority; lower runs earlier. `None` means the default.
    pub priority: Option<i32>,
    /// Fire-and-forget: the publisher starts the handler but does not
    /// await it, and its failure never surfaces in the publish report.
    pub run_async: bool,
    /// Optional predicate gating each invocation.
    pub filter: Option<EventFilter>,
    /// Owning plugin id, used for bulk teardown on disable.
    pub owner: Option<String>,
    /// Display label used in failure reports. Defaults to the pattern.
    pub label: Option<String>,
}

impl SubscribeOptions {
    /// Set the dispatch priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Mark the handler as fire-and-forget.
    pub fn fire_and_forget(mut self) -> Self {
        self.run_async = true;
        self
    }

    /// Set the filter predicate.
    pub fn with_filter(mut self, filter: EventFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Set the owning plugin id.
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Set the display label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// A single handler failure captured during dispatch.
#[derive(Debug, Clone)]
pub struct HandlerFailure {
    /// Label of the failing handler.
    pub handler: String,
    /// Error text.
    pub error: String,
}

/// Result of one publish call.
#[derive(Debug, Clone)]
pub struct PublishReport {
    /// Topic name of the published event.
    pub event: String,
    /// Handlers that ran to completion without failing. Fire-and-forget
    /// handlers count as executed once started.
    pub handlers_executed: usize,
    /// Total synchronous dispatch time in milliseconds.
    pub duration_ms: u64,
    /// Per-handler failures, in dispatch order.
    pub errors: Vec<HandlerFailure>,
}

impl PublishReport {
    /// Overall success: true only when no handler failed.
    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Read-only view of a registered handler.
#[derive(Debug, Clone)]
pub struct HandlerInfo {
    pub id: HandlerId,
    pub pattern: String,
    pub priority: i32,
    pub run_async: bool,
    pub once: bool,
    pub owner: Option<String>,
    pub label: String,
}

/// Collaborator persisting publish outcomes to the durable execution log.
///
/// A sink failure must never propagate: the bus swallows it with a
/// warning and dispatch is unaffected.
pub trait ExecutionLogSink: Send + Sync {
    /// Record one dispatched event and its outcome.
    fn record(&self, event: &Event, report: &PublishReport) -> anyhow::Result<()>;
}

/// No-op sink for tests.
#[derive(Debug, Clone, Default)]
pub struct NoOpLogSink;

impl ExecutionLogSink for NoOpLogSink {
    fn record(&self, _event: &Event, _report: &PublishReport) -> anyhow::Result<()> {
        Ok(())
    }
}

struct Registration {
    id: HandlerId,
    pattern: String,
    priority: i32,
    seq: u64,
    run_async: bool,
    once: bool,
    fired: AtomicBool,
    filter: Option<EventFilter>,
    owner: Option<String>,
    label: String,
    handler: EventHandler,
}

struct BusInner {
    name: String,
    registrations: RwLock<Vec<Arc<Registration>>>,
    next_id: AtomicU64,
    next_seq: AtomicU64,
    sink: RwLock<Option<Arc<dyn ExecutionLogSink>>>,
}

/// In-memory publish/subscribe dispatcher.
///
/// Cloning is cheap; all clones share the same registration table.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

/// Shared event bus handle.
pub type SharedEventBus = Arc<EventBus>;

impl EventBus {
    /// Create a new event bus.
    pub fn new() -> Self {
        Self::with_name("default")
    }

    /// Create a new event bus with a name (used in log lines).
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(BusInner {
                name: name.into(),
                registrations: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
                next_seq: AtomicU64::new(0),
                sink: RwLock::new(None),
            }),
        }
    }

    /// Get the name of this bus.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Attach the durable execution-log sink.
    pub fn set_log_sink(&self, sink: Arc<dyn ExecutionLogSink>) {
        *self.inner.sink.write() = Some(sink);
    }

    /// Subscribe a handler to a topic pattern.
    ///
    /// Returns an id usable with [`EventBus::unsubscribe`].
    pub fn subscribe(
        &self,
        pattern: impl Into<String>,
        handler: EventHandler,
        options: SubscribeOptions,
    ) -> HandlerId {
        self.register(pattern.into(), handler, options, false)
    }

    /// Subscribe a handler that is guaranteed to run at most once, even
    /// under concurrent publishes to the same topic.
    pub fn subscribe_once(
        &self,
        pattern: impl Into<String>,
        handler: EventHandler,
        options: SubscribeOptions,
    ) -> HandlerId {
        self.register(pattern.into(), handler, options, true)
    }

    fn register(
        &self,
        pattern: String,
        handler: EventHandler,
        options: SubscribeOptions,
        once: bool,
    ) -> HandlerId {
        let id = HandlerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        let label = options.label.unwrap_or_else(|| format!("{}#{}", pattern, id));

        let registration = Arc::new(Registration {
            id,
            priority: options.priority.unwrap_or(DEFAULT_HANDLER_PRIORITY),
            seq,
            run_async: options.run_async,
            once,
            fired: AtomicBool::new(false),
            filter: options.filter,
            owner: options.owner,
            label,
            handler,
            pattern,
        });

        self.inner.registrations.write().push(registration);
        id
    }

    /// Remove a handler. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: HandlerId) -> bool {
        let mut regs = self.inner.registrations.write();
        let before = regs.len();
        regs.retain(|r| r.id != id);
        regs.len() != before
    }

    /// Remove every handler owned by the given plugin id. Returns the
    /// number of handlers removed.
    pub fn unsubscribe_owner(&self, owner: &str) -> usize {
        let mut regs = self.inner.registrations.write();
        let before = regs.len();
        regs.retain(|r| r.owner.as_deref() != Some(owner));
        before - regs.len()
    }

    /// List all registered handlers.
    pub fn list_handlers(&self) -> Vec<HandlerInfo> {
        self.inner
            .registrations
            .read()
            .iter()
            .map(|r| HandlerInfo {
                id: r.id,
                pattern: r.pattern.clone(),
                priority: r.priority,
                run_async: r.run_async,
                once: r.once,
                owner: r.owner.clone(),
                label: r.label.clone(),
            })
            .collect()
    }

    /// Number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.inner.registrations.read().len()
    }

    /// Remove every handler.
    pub fn clear_all(&self) {
        self.inner.registrations.write().clear();
    }

    /// Obtain a cancellation guard for a subscription.
    pub fn subscription(&self, id: HandlerId) -> Subscription {
        Subscription {
            bus: self.clone(),
            id,
        }
    }

    /// Publish an event by topic name and payload.
    pub async fn publish(&self, name: impl Into<String>, payload: serde_json::Value) -> PublishReport {
        self.publish_event(Event::new(name, payload)).await
    }

    /// Publish an event on behalf of a named source component.
    pub async fn publish_from(
        &self,
        source: impl Into<String>,
        name: impl Into<String>,
        payload: serde_json::Value,
    ) -> PublishReport {
        self.publish_event(Event::new(name, payload).with_source(source))
            .await
    }

    /// Publish a pre-built event.
    ///
    /// Candidate handlers (exact plus wildcard matches) are sorted by
    /// ascending priority, ties broken by registration order, and invoked
    /// sequentially. The dispatch list is snapshotted before iteration so
    /// an unsubscribe during an in-flight publish is never observed as a
    /// torn removal. Publishing with zero matching handlers is not an
    /// error.
    pub async fn publish_event(&self, event: Event) -> PublishReport {
        let mut candidates: Vec<Arc<Registration>> = {
            let regs = self.inner.registrations.read();
            regs.iter()
                .filter(|r| topic::matches(&r.pattern, &event.name))
                .cloned()
                .collect()
        };
        candidates.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.seq.cmp(&b.seq)));

        let started = Instant::now();
        let mut executed = 0usize;
        let mut errors = Vec::new();

        for registration in candidates {
            if let Some(filter) = &registration.filter {
                if !filter(&event) {
                    continue;
                }
            }

            // A once-handler claims its single invocation atomically so
            // concurrent publishes cannot both run it.
            if registration.once {
                if registration.fired.swap(true, Ordering::SeqCst) {
                    continue;
                }
                self.unsubscribe(registration.id);
            }

            if registration.run_async {
                let future = (registration.handler)(event.clone());
                let label = registration.label.clone();
                let bus_name = self.inner.name.clone();
                tokio::spawn(async move {
                    if let Err(error) = future.await {
                        tracing::warn!(
                            bus = %bus_name,
                            handler = %label,
                            error = %error,
                            "async event handler failed"
                        );
                    }
                });
                executed += 1;
            } else {
                match (registration.handler)(event.clone()).await {
                    Ok(()) => executed += 1,
                    Err(error) => {
                        tracing::warn!(
                            bus = %self.inner.name,
                            handler = %registration.label,
                            event = %event.name,
                            error = %error,
                            "event handler failed"
                        );
                        errors.push(HandlerFailure {
                            handler: registration.label.clone(),
                            error: error.to_string(),
                        });
                    }
                }
            }
        }

        let report = PublishReport {
            event: event.name.clone(),
            handlers_executed: executed,
            duration_ms: started.elapsed().as_millis() as u64,
            errors,
        };

        // Observability must never take down the primary path.
        let sink = self.inner.sink.read().clone();
        if let Some(sink) = sink {
            if let Err(error) = sink.record(&event, &report) {
                tracing::warn!(bus = %self.inner.name, error = %error, "execution log sink failed");
            }
        }

        report
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Cancellation guard for a single subscription.
pub struct Subscription {
    bus: EventBus,
    id: HandlerId,
}

impl Subscription {
    /// The underlying handler id.
    pub fn id(&self) -> HandlerId {
        self.id
    }

    /// Remove the subscription. Returns `false` if it was already gone.
    pub fn cancel(self) -> bool {
        self.bus.unsubscribe(self.id)
    }
}
