//! Health endpoint.

use serde::Serialize;

use crate::handlers::common::{ok, HandlerResult};

/// Health payload.
#[derive(Debug, Serialize)]
pub struct HealthDto {
    pub status: &'static str,
    pub version: &'static str,
}

/// GET /admin/health
pub async fn health_handler() -> HandlerResult<HealthDto> {
    ok(HealthDto {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
