//! Extension route gateway.
//!
//! Inbound requests under `/ext` are resolved against the declared
//! route table (exact match first, then longest prefix) and dispatched
//! into the owning loaded instance.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::Method;

use crate::handlers::common::{ok, HandlerResult};
use crate::models::error::ErrorResponse;
use crate::server::ServerState;

/// ANY /ext/*path
pub async fn gateway_handler(
    State(state): State<ServerState>,
    method: Method,
    Path(path): Path<String>,
    body: Bytes,
) -> HandlerResult<serde_json::Value> {
    let path = format!("/{}", path.trim_start_matches('/'));

    let args = if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body)
            .map_err(|_| ErrorResponse::bad_request("request body must be JSON"))?
    };

    let result = state
        .router
        .dispatch(method.as_str(), &path, args)
        .await
        .map_err(ErrorResponse::from)?;
    ok(result)
}
