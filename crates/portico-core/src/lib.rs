//! Core types for the Portico extension runtime.
//!
//! This crate defines the foundational abstractions of the plugin
//! subsystem: the in-memory event bus, the extension manifest model,
//! and the plugin trait with its explicit factory registration table.
//! Everything that persists or serves HTTP lives in the sibling crates.

pub mod bus;
pub mod error;
pub mod event;
pub mod manifest;
pub mod plugin;
pub mod topic;

pub use bus::{
    EventBus, EventFilter, EventHandler, ExecutionLogSink, HandlerFailure, HandlerId, HandlerInfo,
    NoOpLogSink, PublishReport, SharedEventBus, SubscribeOptions, Subscription,
    DEFAULT_HANDLER_PRIORITY,
};
pub use error::{Error, Result};
pub use event::Event;
pub use manifest::{
    slugify, ExtensionManifest, ExtensionType, ManifestBackend, ManifestEvents, ManifestUi,
    RouteSpec, UiMode,
};
pub use plugin::{
    EventHandlerSpec, ExtensionPlugin, PluginContext, PluginFactory, PluginFactoryRegistry,
    StubPlugin,
};
