//! Application router configuration.

use axum::extract::DefaultBodyLimit;
use axum::routing::{any, delete, get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::{ServerState, MAX_UPLOAD_BYTES};
use crate::handlers::{associations, basic, extensions, gateway, observability};

/// Create the application router with the given state.
pub fn create_router(state: ServerState) -> Router {
    Router::new()
        // Health
        .route("/admin/health", get(basic::health_handler))
        // Extension management
        .route(
            "/admin/extensions/upload",
            post(extensions::upload_extension_handler),
        )
        .route("/admin/extensions", get(extensions::list_extensions_handler))
        // Observability (static segments, registered alongside /:id)
        .route(
            "/admin/extensions/stats/overview",
            get(observability::stats_overview_handler),
        )
        .route(
            "/admin/extensions/event-logs",
            get(observability::event_logs_handler),
        )
        // Associations
        .route(
            "/admin/extensions/menu-link",
            post(associations::create_menu_link_handler),
        )
        .route(
            "/admin/extensions/menu-link/:menu_link_id",
            delete(associations::delete_menu_link_handler),
        )
        .route(
            "/admin/extensions/profile-widgets",
            post(associations::create_widget_handler).get(associations::list_widgets_handler),
        )
        .route(
            "/admin/extensions/profile-widgets/:widget_id",
            delete(associations::delete_widget_handler),
        )
        // Single-extension operations
        .route("/admin/extensions/:id", get(extensions::get_extension_handler))
        .route(
            "/admin/extensions/:id/enable",
            post(extensions::enable_extension_handler),
        )
        .route(
            "/admin/extensions/:id/disable",
            post(extensions::disable_extension_handler),
        )
        .route(
            "/admin/extensions/:id/config",
            put(extensions::update_config_handler),
        )
        .route(
            "/admin/extensions/:id",
            delete(extensions::delete_extension_handler),
        )
        // Extension route gateway
        .route("/ext/*path", any(gateway::gateway_handler))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
