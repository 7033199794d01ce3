//! Unified API response models.

use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unified API response wrapper.
///
/// All endpoints return this wrapper for consistency:
///
/// ```json
/// {
///   "success": true,
///   "data": { ... },
///   "meta": { "timestamp": "...", "request_id": "..." }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Whether the request was successful.
    pub success: bool,

    /// Response data (present on success).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,

    /// Response metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

/// Response metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMeta {
    /// Response timestamp.
    pub timestamp: DateTime<Utc>,
    /// Request ID for tracing.
    pub request_id: String,
}

impl Default for ResponseMeta {
    fn default() -> Self {
        Self {
            timestamp: Utc::now(),
            request_id: Uuid::new_v4().to_string(),
        }
    }
}

impl<T> ApiResponse<T> {
    /// Create a success response with data.
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            meta: Some(ResponseMeta::default()),
        }
    }

    /// Create a response without data (e.g. for DELETE operations).
    pub fn empty() -> Self {
        Self {
            success: true,
            data: None,
            meta: Some(ResponseMeta::default()),
        }
    }
}

impl<T> IntoResponse for ApiResponse<T>
where
    T: Serialize,
{
    fn into_response(self) -> Response {
        axum::Json(self).into_response()
    }
}
