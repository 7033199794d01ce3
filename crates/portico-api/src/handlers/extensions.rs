//! Extension management handlers.
//!
//! Upload, listing, enable/disable, configuration, and uninstall for the
//! extension catalog. Enable and disable drive the loader and the route
//! table and announce each transition on the bus.

use axum::extract::{Multipart, Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use portico_core::ExtensionType;
use portico_storage::{CatalogFilter, ExtensionRecord, ExtensionUpdate};

use crate::handlers::common::{ok, HandlerResult};
use crate::models::error::ErrorResponse;
use crate::server::ServerState;

/// Extension DTO for API responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionDto {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub version: String,
    pub extension_type: String,
    pub ui_mode: String,
    pub enabled: bool,
    /// Whether a live instance exists in the loader.
    pub loaded: bool,
    /// Whether the live instance is the inert fallback stub.
    pub stub: Option<bool>,
    pub subscriptions: Vec<String>,
    pub config: serde_json::Value,
    pub installed_at: i64,
    pub updated_at: i64,
}

async fn to_dto(state: &ServerState, record: &ExtensionRecord) -> ExtensionDto {
    let instance = state.loader.instance(&record.id).await;
    ExtensionDto {
        id: record.id.clone(),
        name: record.name.clone(),
        slug: record.slug.clone(),
        version: record.version.clone(),
        extension_type: record.extension_type.as_str().to_string(),
        ui_mode: format!("{:?}", record.ui_mode).to_lowercase(),
        enabled: record.enabled,
        loaded: instance.is_some(),
        stub: instance.map(|instance| instance.stub),
        subscriptions: record.subscriptions.clone(),
        config: record.config.clone(),
        installed_at: record.installed_at,
        updated_at: record.updated_at,
    }
}

/// Upload response payload.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallResponseDto {
    pub extension_id: String,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Query parameters for listing extensions.
#[derive(Debug, Deserialize)]
pub struct ListExtensionsQuery {
    /// Filter by extension type.
    #[serde(rename = "type")]
    pub extension_type: Option<String>,
    /// Filter by enabled flag ("true"/"false").
    pub enabled: Option<String>,
}

/// POST /admin/extensions/upload
///
/// Multipart body: binary archive (`file`) plus `name`, `extensionType`,
/// optional `enabled` and `config`. Failures return 400 with the
/// collected error list.
pub async fn upload_extension_handler(
    State(state): State<ServerState>,
    mut multipart: Multipart,
) -> HandlerResult<InstallResponseDto> {
    let mut archive: Option<Vec<u8>> = None;
    let mut name: Option<String> = None;
    let mut extension_type: Option<String> = None;
    let mut enable_now = false;
    let mut config: Option<serde_json::Value> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ErrorResponse::bad_request(format!("invalid multipart body: {}", e)))?
    {
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "file" | "archive" => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ErrorResponse::bad_request(format!("invalid archive field: {}", e)))?;
                archive = Some(bytes.to_vec());
            }
            "name" => {
                name = Some(read_text_field(field).await?);
            }
            "extensionType" | "extension_type" => {
                extension_type = Some(read_text_field(field).await?);
            }
            "enabled" => {
                enable_now = read_text_field(field).await? == "true";
            }
            "config" => {
                let text = read_text_field(field).await?;
                let value: serde_json::Value = serde_json::from_str(&text)
                    .map_err(|_| ErrorResponse::bad_request("config must be a JSON object"))?;
                config = Some(value);
            }
            _ => {}
        }
    }

    let archive =
        archive.ok_or_else(|| ErrorResponse::bad_request("missing archive field 'file'"))?;
    let name = name.ok_or_else(|| ErrorResponse::bad_request("missing field 'name'"))?;
    let extension_type = extension_type
        .ok_or_else(|| ErrorResponse::bad_request("missing field 'extensionType'"))?
        .parse::<ExtensionType>()
        .map_err(ErrorResponse::bad_request)?;

    let outcome = state
        .installer
        .install(&archive, &name, extension_type, config)
        .await;

    if !outcome.success {
        return Err(ErrorResponse::bad_request(outcome.message).with_details(outcome.errors));
    }
    let extension_id = outcome
        .extension_id
        .ok_or_else(|| ErrorResponse::internal("installer returned no extension id"))?;

    if enable_now {
        enable_extension(&state, &extension_id).await?;
    }

    ok(InstallResponseDto {
        extension_id,
        message: outcome.message,
        warnings: outcome.warnings,
    })
}

/// GET /admin/extensions
pub async fn list_extensions_handler(
    State(state): State<ServerState>,
    Query(query): Query<ListExtensionsQuery>,
) -> HandlerResult<Vec<ExtensionDto>> {
    let filter = CatalogFilter {
        extension_type: match &query.extension_type {
            Some(raw) => Some(raw.parse().map_err(ErrorResponse::bad_request)?),
            None => None,
        },
        enabled: match query.enabled.as_deref() {
            Some("true") => Some(true),
            Some("false") => Some(false),
            Some(other) => {
                return Err(ErrorResponse::bad_request(format!(
                    "enabled must be \"true\" or \"false\", got \"{}\"",
                    other
                )))
            }
            None => None,
        },
    };

    let records = state.catalog.find_all(&filter)?;
    let mut extensions = Vec::with_capacity(records.len());
    for record in &records {
        extensions.push(to_dto(&state, record).await);
    }
    ok(extensions)
}

/// GET /admin/extensions/:id
pub async fn get_extension_handler(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> HandlerResult<ExtensionDto> {
    let record = state
        .catalog
        .find_by_id(&id)?
        .ok_or_else(|| ErrorResponse::not_found(format!("extension {}", id)))?;
    ok(to_dto(&state, &record).await)
}

/// POST /admin/extensions/:id/enable
pub async fn enable_extension_handler(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> HandlerResult<ExtensionDto> {
    let record = enable_extension(&state, &id).await?;
    ok(to_dto(&state, &record).await)
}

/// POST /admin/extensions/:id/disable
pub async fn disable_extension_handler(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> HandlerResult<ExtensionDto> {
    let record = disable_extension(&state, &id).await?;
    ok(to_dto(&state, &record).await)
}

/// PUT /admin/extensions/:id/config
///
/// Replaces the configuration blob and reloads the extension when it is
/// currently loaded.
pub async fn update_config_handler(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    Json(config): Json<serde_json::Value>,
) -> HandlerResult<ExtensionDto> {
    let record = state.catalog.update(
        &id,
        ExtensionUpdate {
            config: Some(config),
            ..Default::default()
        },
    )?;

    if state.loader.is_loaded(&id).await {
        state.loader.reload(&id).await?;
        state.router.reload_extension(&record.slug)?;
    }

    ok(to_dto(&state, &record).await)
}

/// DELETE /admin/extensions/:id
pub async fn delete_extension_handler(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> HandlerResult<serde_json::Value> {
    let record = state.installer.uninstall(&id).await?;
    state.router.reload_extension(&record.slug)?;
    ok(serde_json::json!({
        "message": format!("Extension '{}' uninstalled", record.name)
    }))
}

/// Enable flow shared by the upload and enable endpoints: persist the
/// flag, load the instance, refresh routes, announce the transition.
pub(crate) async fn enable_extension(
    state: &ServerState,
    id: &str,
) -> Result<ExtensionRecord, ErrorResponse> {
    let record = state.catalog.enable(id)?;
    state.loader.load(&record).await?;
    state.router.reload_extension(&record.slug)?;
    state
        .bus
        .publish_from(
            "admin",
            "extension.enabled",
            serde_json::json!({"extension_id": record.id, "slug": record.slug}),
        )
        .await;
    Ok(record)
}

/// Disable flow: unload, persist the flag, drop routes, announce.
pub(crate) async fn disable_extension(
    state: &ServerState,
    id: &str,
) -> Result<ExtensionRecord, ErrorResponse> {
    match state.loader.unload(id).await {
        Ok(()) | Err(portico_runtime::RuntimeError::NotLoaded(_)) => {}
        Err(error) => return Err(error.into()),
    }
    let record = state.catalog.disable(id)?;
    state.router.reload_extension(&record.slug)?;
    state
        .bus
        .publish_from(
            "admin",
            "extension.disabled",
            serde_json::json!({"extension_id": record.id, "slug": record.slug}),
        )
        .await;
    Ok(record)
}

async fn read_text_field(field: axum::extract::multipart::Field<'_>) -> Result<String, ErrorResponse> {
    field
        .text()
        .await
        .map_err(|e| ErrorResponse::bad_request(format!("invalid form field: {}", e)))
}
