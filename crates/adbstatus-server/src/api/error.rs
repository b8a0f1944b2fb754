//! API error types and response handling.
//!
//! Every failure leaves the server as a JSON [`ErrorResponse`], including
//! malformed requests, unknown routes and unsupported methods.

use axum::extract::rejection::{PathRejection, QueryRejection};
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Result type alias for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Unified API error type.
#[derive(Debug, Clone)]
pub enum ApiError {
    /// 400 Bad Request - The path or query could not be decoded.
    BadRequest {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
        /// What the extractor rejected.
        details: Option<String>,
    },

    /// 404 Not Found - Resource does not exist.
    NotFound {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 405 Method Not Allowed.
    MethodNotAllowed {
        /// The rejected method.
        method: String,
        /// The requested path.
        path: String,
    },
}

impl ApiError {
    /// 404 for a serial missing from the current snapshot.
    #[must_use]
    pub fn device_not_found(serial: &str) -> Self {
        Self::NotFound {
            error_code: "device_not_found".to_string(),
            message: format!("No device with serial '{serial}' is connected"),
        }
    }

    /// 404 for a path no route serves.
    #[must_use]
    pub fn route_not_found(uri: &Uri) -> Self {
        Self::NotFound {
            error_code: "not_found".to_string(),
            message: format!("No route for {}", uri.path()),
        }
    }

    /// The HTTP status this error is answered with.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
        }
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::BadRequest {
            error_code: "invalid_path".to_string(),
            message: "The request path could not be decoded".to_string(),
            details: Some(rejection.body_text()),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest {
            error_code: "invalid_query".to_string(),
            message: "The query string could not be decoded".to_string(),
            details: Some(rejection.body_text()),
        }
    }
}

/// Standard JSON error response body.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "device_not_found",
    "message": "No device with serial 'R58M123ABC' is connected",
    "details": null
}))]
pub struct ErrorResponse {
    /// Machine-readable error code (e.g., "device_not_found").
    #[schema(example = "device_not_found")]
    pub error: String,

    /// Human-readable error message.
    #[schema(example = "No device with serial 'R58M123ABC' is connected")]
    pub message: String,

    /// Optional additional details for debugging.
    #[schema(nullable)]
    pub details: Option<serde_json::Value>,
}

impl From<ApiError> for ErrorResponse {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::BadRequest {
                error_code,
                message,
                details,
            } => Self {
                error: error_code,
                message,
                details: details.map(serde_json::Value::String),
            },
            ApiError::NotFound { error_code, message } => Self {
                error: error_code,
                message,
                details: None,
            },
            ApiError::MethodNotAllowed { method, path } => Self {
                error: "method_not_allowed".to_string(),
                message: format!("{method} is not supported on {path}"),
                details: None,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(ErrorResponse::from(self))).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadRequest { message, .. } => write!(f, "Bad Request: {message}"),
            Self::NotFound { message, .. } => write!(f, "Not Found: {message}"),
            Self::MethodNotAllowed { method, path } => {
                write!(f, "Method Not Allowed: {method} {path}")
            }
        }
    }
}

impl std::error::Error for ApiError {}

/// Fallback for paths no route serves.
pub async fn not_found(uri: Uri) -> ApiError {
    ApiError::route_not_found(&uri)
}

/// Fallback for known paths hit with an unsupported method.
pub async fn method_not_allowed(method: Method, uri: Uri) -> ApiError {
    ApiError::MethodNotAllowed {
        method: method.to_string(),
        path: uri.path().to_string(),
    }
}
