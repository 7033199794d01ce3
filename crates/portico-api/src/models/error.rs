//! Unified error handling for the API.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unified API error response with proper HTTP status codes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// HTTP status code.
    #[serde(skip)]
    pub status: StatusCode,
    /// Detailed error list (e.g. collected manifest validation errors).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<String>>,
}

impl ErrorResponse {
    /// Create a new error response.
    pub fn new(code: impl Into<String>, message: impl Into<String>, status: StatusCode) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            status,
            details: None,
        }
    }

    /// Attach a detailed error list.
    pub fn with_details(mut self, details: Vec<String>) -> Self {
        self.details = Some(details);
        self
    }

    // Common error constructors

    /// Bad request (400).
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new("BAD_REQUEST", message, StatusCode::BAD_REQUEST)
    }

    /// Not found (404).
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new(
            "NOT_FOUND",
            format!("{} not found", resource.into()),
            StatusCode::NOT_FOUND,
        )
    }

    /// Conflict (409).
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new("CONFLICT", message, StatusCode::CONFLICT)
    }

    /// Internal server error (500).
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("INTERNAL_ERROR", message, StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Service unavailable (503).
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(
            "SERVICE_UNAVAILABLE",
            message,
            StatusCode::SERVICE_UNAVAILABLE,
        )
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = serde_json::json!({
            "success": false,
            "error": {
                "code": self.code,
                "message": self.message,
                "details": self.details,
            }
        });
        (status, axum::Json(body)).into_response()
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ErrorResponse {}

// Conversion from collaborator error types.

impl From<anyhow::Error> for ErrorResponse {
    fn from(e: anyhow::Error) -> Self {
        Self::internal(e.to_string())
    }
}

impl From<portico_storage::Error> for ErrorResponse {
    fn from(e: portico_storage::Error) -> Self {
        match e {
            portico_storage::Error::NotFound(what) => Self::not_found(what),
            portico_storage::Error::DuplicateSlug(slug) => {
                Self::conflict(format!("slug '{}' is already registered", slug))
            }
            portico_storage::Error::InvalidInput(msg) => Self::bad_request(msg),
            other => Self::internal(other.to_string()),
        }
    }
}

impl From<portico_runtime::RuntimeError> for ErrorResponse {
    fn from(e: portico_runtime::RuntimeError) -> Self {
        use portico_runtime::RuntimeError;
        match e {
            RuntimeError::NotFound(what) => Self::not_found(format!("extension {}", what)),
            RuntimeError::NotLoaded(slug) => {
                Self::service_unavailable(format!("extension '{}' is not loaded", slug))
            }
            RuntimeError::RouteNotFound { method, path } => {
                Self::not_found(format!("route {} {}", method, path))
            }
            RuntimeError::Install(errors) => {
                Self::bad_request("installation failed").with_details(errors)
            }
            RuntimeError::Archive(msg) => Self::bad_request(msg),
            RuntimeError::Core(portico_core::Error::HandlerNotSupported(handler)) => {
                Self::not_found(format!("route handler {}", handler))
            }
            RuntimeError::Storage(e) => e.into(),
            other => Self::internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_mapping() {
        let err: ErrorResponse = portico_storage::Error::NotFound("extension x".into()).into();
        assert_eq!(err.status, StatusCode::NOT_FOUND);

        let err: ErrorResponse = portico_storage::Error::DuplicateSlug("w".into()).into();
        assert_eq!(err.status, StatusCode::CONFLICT);
    }

    #[test]
    fn test_runtime_error_mapping() {
        let err: ErrorResponse = portico_runtime::RuntimeError::NotLoaded("w".into()).into();
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);

        let err: ErrorResponse = portico_runtime::RuntimeError::RouteNotFound {
            method: "GET".into(),
            path: "/x".into(),
        }
        .into();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_details_serialized() {
        let err = ErrorResponse::bad_request("upload failed")
            .with_details(vec!["manifest.version is required".into()]);
        assert_eq!(err.details.as_ref().unwrap().len(), 1);
    }
}
