//! Menu-link and profile-widget association handlers.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use portico_storage::{MenuLinkRecord, WidgetPlacementRecord};

use crate::handlers::common::{ok, HandlerResult};
use crate::models::error::ErrorResponse;
use crate::server::ServerState;

/// Request to create a menu link.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMenuLinkRequest {
    pub extension_id: String,
    pub label: String,
    pub url: String,
    #[serde(default)]
    pub position: i32,
    #[serde(default)]
    pub config: serde_json::Value,
}

/// Menu link DTO.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuLinkDto {
    pub id: String,
    pub extension_id: String,
    pub label: String,
    pub url: String,
    pub position: i32,
}

impl From<MenuLinkRecord> for MenuLinkDto {
    fn from(record: MenuLinkRecord) -> Self {
        Self {
            id: record.id,
            extension_id: record.extension_id,
            label: record.label,
            url: record.url,
            position: record.position,
        }
    }
}

/// POST /admin/extensions/menu-link
pub async fn create_menu_link_handler(
    State(state): State<ServerState>,
    Json(request): Json<CreateMenuLinkRequest>,
) -> HandlerResult<MenuLinkDto> {
    let mut record = MenuLinkRecord::new(&request.extension_id, &request.label, &request.url)
        .with_position(request.position);
    record.config = request.config;

    let record = state.catalog.add_menu_link(&record)?;
    ok(record.into())
}

/// DELETE /admin/extensions/menu-link/:menu_link_id
pub async fn delete_menu_link_handler(
    State(state): State<ServerState>,
    Path(menu_link_id): Path<String>,
) -> HandlerResult<serde_json::Value> {
    if !state.catalog.remove_menu_link(&menu_link_id)? {
        return Err(ErrorResponse::not_found(format!(
            "menu link {}",
            menu_link_id
        )));
    }
    ok(serde_json::json!({"message": "Menu link removed"}))
}

/// Request to create a widget placement.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWidgetRequest {
    pub extension_id: String,
    pub zone: String,
    #[serde(default)]
    pub position: i32,
    #[serde(default = "default_span")]
    pub width: i32,
    #[serde(default = "default_span")]
    pub height: i32,
    #[serde(default)]
    pub config: serde_json::Value,
}

fn default_span() -> i32 {
    1
}

/// Widget placement DTO.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetDto {
    pub id: String,
    pub extension_id: String,
    pub zone: String,
    pub position: i32,
    pub width: i32,
    pub height: i32,
    pub enabled: bool,
}

impl From<WidgetPlacementRecord> for WidgetDto {
    fn from(record: WidgetPlacementRecord) -> Self {
        Self {
            id: record.id,
            extension_id: record.extension_id,
            zone: record.zone,
            position: record.position,
            width: record.width,
            height: record.height,
            enabled: record.enabled,
        }
    }
}

/// Query parameters for listing widget placements.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListWidgetsQuery {
    pub extension_id: Option<String>,
}

/// POST /admin/extensions/profile-widgets
pub async fn create_widget_handler(
    State(state): State<ServerState>,
    Json(request): Json<CreateWidgetRequest>,
) -> HandlerResult<WidgetDto> {
    let mut record = WidgetPlacementRecord::new(&request.extension_id, &request.zone)
        .with_geometry(request.position, request.width, request.height);
    record.config = request.config;

    let record = state.catalog.add_widget_placement(&record)?;
    ok(record.into())
}

/// GET /admin/extensions/profile-widgets
pub async fn list_widgets_handler(
    State(state): State<ServerState>,
    Query(query): Query<ListWidgetsQuery>,
) -> HandlerResult<Vec<WidgetDto>> {
    let records = state
        .catalog
        .list_widget_placements(query.extension_id.as_deref())?;
    ok(records.into_iter().map(WidgetDto::from).collect())
}

/// DELETE /admin/extensions/profile-widgets/:widget_id
pub async fn delete_widget_handler(
    State(state): State<ServerState>,
    Path(widget_id): Path<String>,
) -> HandlerResult<serde_json::Value> {
    if !state.catalog.remove_widget_placement(&widget_id)? {
        return Err(ErrorResponse::not_found(format!("widget {}", widget_id)));
    }
    ok(serde_json::json!({"message": "Widget placement removed"}))
}
