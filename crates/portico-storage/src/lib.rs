//! Durable stores for the Portico extension runtime.
//!
//! Two redb-backed stores: the extension catalog (installed extensions
//! plus their menu-link and widget-placement associations) and the
//! append-only event execution log.

pub mod catalog;
pub mod error;
pub mod event_log;

pub use catalog::{
    CatalogFilter, CatalogStatistics, CatalogStore, ExtensionRecord, ExtensionUpdate,
    MenuLinkRecord, WidgetPlacementRecord,
};
pub use error::{Error, Result};
pub use event_log::{EventLogRecord, EventLogStore};
