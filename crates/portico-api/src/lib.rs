//! Administrative HTTP surface for the Portico extension runtime.
//!
//! Exposes the `/admin/extensions` management API (upload, listing,
//! enable/disable, configuration, associations, observability) and the
//! `/ext` gateway that dispatches inbound requests to extension-declared
//! routes. Request authentication/authorization is the host's concern:
//! this router is mounted behind whatever middleware the host supplies.

pub mod builtins;
pub mod handlers;
pub mod models;
pub mod server;

pub use server::{create_router, ServerState};
