//! Common API handler utilities.

use axum::response::Json;

use crate::models::{common::ApiResponse, error::ErrorResponse};

/// Unified Result type for all API handlers.
///
/// The success value is automatically wrapped in [`ApiResponse`].
pub type HandlerResult<T> = Result<Json<ApiResponse<T>>, ErrorResponse>;

/// Create a successful response with data.
pub fn ok<T: serde::Serialize>(data: T) -> HandlerResult<T> {
    Ok(Json(ApiResponse::success(data)))
}
