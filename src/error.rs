//! Reconciliation errors and their JSON HTTP representation

use crate::record::ValidationError;
use crate::render::RenderError;
use crate::signal::SignalError;
use crate::store::StoreError;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use serde::Serialize;
use thiserror::Error;

/// Error categories visible to callers
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error("entry already exists: {identifier}")]
    Conflict { identifier: String },

    #[error("entry not found: {identifier}")]
    NotFound { identifier: String },

    #[error("error rendering configuration: {0}")]
    Render(#[from] RenderError),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// The configuration change is stored and in effect on disk; only the
    /// reload of running processes failed.
    #[error("configuration stored but reload failed: {0}")]
    SignalPropagation(#[from] SignalError),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ReconcileError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ReconcileError::Validation(_) => ErrorCode::InvalidRequest,
            ReconcileError::Conflict { .. } => ErrorCode::AlreadyExists,
            ReconcileError::NotFound { .. } => ErrorCode::NotFound,
            ReconcileError::Render(_) => ErrorCode::RenderFailed,
            ReconcileError::Storage(_) => ErrorCode::StorageFailed,
            ReconcileError::SignalPropagation(_) => ErrorCode::ReloadFailed,
            ReconcileError::Configuration(_) => ErrorCode::ConfigurationError,
        }
    }

    /// Whether the change was durably applied despite the error
    pub fn change_committed(&self) -> bool {
        matches!(self, ReconcileError::SignalPropagation(_))
    }
}

/// Machine-readable error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Malformed body, identifier or target
    InvalidRequest,
    /// Create on an identifier that already has files
    AlreadyExists,
    /// Operation on an identifier without an entry
    NotFound,
    /// Template execution failed
    RenderFailed,
    /// Filesystem read, write or remove failed
    StorageFailed,
    /// Listing or signaling proxy processes failed after the change was stored
    ReloadFailed,
    /// Startup configuration problem
    ConfigurationError,
    /// No such route
    RouteNotFound,
    /// Route exists but not for this method
    MethodNotAllowed,
}

impl ErrorCode {
    /// HTTP status sent for this code
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidRequest => StatusCode::BAD_REQUEST,
            ErrorCode::AlreadyExists => StatusCode::BAD_REQUEST,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::RenderFailed => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::StorageFailed => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::ReloadFailed => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::ConfigurationError => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::RouteNotFound => StatusCode::NOT_FOUND,
            ErrorCode::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
        }
    }

    /// Value for the X-Routegate-Error header
    pub fn as_header_value(&self) -> &'static str {
        match self {
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::AlreadyExists => "ALREADY_EXISTS",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::RenderFailed => "RENDER_FAILED",
            ErrorCode::StorageFailed => "STORAGE_FAILED",
            ErrorCode::ReloadFailed => "RELOAD_FAILED",
            ErrorCode::ConfigurationError => "CONFIGURATION_ERROR",
            ErrorCode::RouteNotFound => "ROUTE_NOT_FOUND",
            ErrorCode::MethodNotAllowed => "METHOD_NOT_ALLOWED",
        }
    }
}

/// JSON error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Machine-readable error code, also sent as X-Routegate-Error
    pub code: ErrorCode,
    /// Human-readable description, usually the underlying error's Display
    pub message: String,
    /// HTTP status the response is sent with
    pub status: u16,
}

impl ErrorResponse {
    /// Build a body whose status follows from `code`
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: code.status_code().as_u16(),
            code,
            message: message.into(),
        }
    }

    /// Serialize the body. Falls back to a message-less body carrying only
    /// the code and status if serialization fails.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            serde_json::json!({ "code": self.code, "status": self.status }).to_string()
        })
    }
}

/// Create a JSON error response with the X-Routegate-Error header
pub fn json_error_response(code: ErrorCode, message: impl Into<String>) -> Response<Full<Bytes>> {
    let error = ErrorResponse::new(code, message);

    Response::builder()
        .status(code.status_code())
        .header("Content-Type", "application/json")
        .header("X-Routegate-Error", code.as_header_value())
        .body(Full::new(Bytes::from(error.to_json())))
        .expect("valid response with StatusCode enum and static headers")
}
