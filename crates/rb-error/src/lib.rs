use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, warn};

#[cfg(feature = "axum")]
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json},
};

/// Unified error type shared by every crate in the workspace.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum RbError {
    // === credentials ===
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("username already taken: {username}")]
    UsernameTaken { username: String },

    // === tokens ===
    #[error("token expired")]
    TokenExpired,

    #[error("malformed token: {reason}")]
    TokenMalformed { reason: String },

    #[error("token presented from a different client address")]
    TokenAddressMismatch,

    #[error("wrong token class: expected {expected}, found {found}")]
    TokenWrongClass { expected: String, found: String },

    // === authorization ===
    #[error("route not found: {route}")]
    RouteNotFound { route: String },

    #[error("not authorized: {operation}")]
    NotAuthorized { operation: String },

    // === entities ===
    #[error("resource not found: {resource}")]
    NotFound { resource: String },

    #[error("resource conflict: {details}")]
    Conflict { details: String },

    #[error("validation failed: {message}")]
    Validation { message: String },

    // === technical ===
    #[error("storage failure during {operation}")]
    Storage { operation: String, message: String },

    #[error("stored password hash is malformed: {message}")]
    MalformedHash { message: String },

    #[error("configuration error: {key} - {reason}")]
    Configuration { key: String, reason: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

/// Severity used to pick the log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Low,      // expected outcome of a request (bad password, denied check)
    Medium,   // caller mistake or conflicting input
    High,     // collaborator failure
    Critical, // broken data or configuration
}

/// Correlation data attached to a logged error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMetadata {
    pub error_id: String,
    pub severity: ErrorSeverity,
    pub component: String,
    pub operation: Option<String>,
    pub user_id: Option<String>,
    pub client_address: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl RbError {
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            RbError::InvalidCredentials
            | RbError::TokenExpired
            | RbError::TokenMalformed { .. }
            | RbError::TokenAddressMismatch
            | RbError::TokenWrongClass { .. }
            | RbError::NotAuthorized { .. }
            | RbError::RouteNotFound { .. }
            | RbError::NotFound { .. } => ErrorSeverity::Low,
            RbError::UsernameTaken { .. }
            | RbError::Conflict { .. }
            | RbError::Validation { .. } => ErrorSeverity::Medium,
            RbError::Storage { .. } => ErrorSeverity::High,
            RbError::MalformedHash { .. }
            | RbError::Configuration { .. }
            | RbError::Internal { .. } => ErrorSeverity::Critical,
        }
    }

    /// Stable machine-readable code. Credential and token failures share one
    /// code so a client cannot tell which check rejected it.
    pub fn code(&self) -> &'static str {
        match self {
            RbError::InvalidCredentials
            | RbError::TokenExpired
            | RbError::TokenMalformed { .. }
            | RbError::TokenAddressMismatch
            | RbError::TokenWrongClass { .. } => "unauthenticated",
            RbError::NotAuthorized { .. } => "forbidden",
            RbError::RouteNotFound { .. } | RbError::NotFound { .. } => "not_found",
            RbError::UsernameTaken { .. } | RbError::Conflict { .. } => "conflict",
            RbError::Validation { .. } => "invalid_request",
            _ => "internal",
        }
    }

    pub fn to_http_status(&self) -> u16 {
        match self {
            RbError::InvalidCredentials
            | RbError::TokenExpired
            | RbError::TokenMalformed { .. }
            | RbError::TokenAddressMismatch
            | RbError::TokenWrongClass { .. } => 401,
            RbError::NotAuthorized { .. } => 403,
            RbError::RouteNotFound { .. } | RbError::NotFound { .. } => 404,
            RbError::UsernameTaken { .. } | RbError::Conflict { .. } => 409,
            RbError::Validation { .. } => 400,
            _ => 500,
        }
    }

    /// Message safe to show to an end user.
    pub fn user_message(&self) -> String {
        match self {
            RbError::InvalidCredentials
            | RbError::TokenExpired
            | RbError::TokenMalformed { .. }
            | RbError::TokenAddressMismatch
            | RbError::TokenWrongClass { .. } => "authentication failed".to_string(),
            RbError::NotAuthorized { .. } => "forbidden".to_string(),
            RbError::RouteNotFound { .. } | RbError::NotFound { .. } => "not found".to_string(),
            RbError::UsernameTaken { .. } => "username is not available".to_string(),
            RbError::Conflict { .. } => "conflicting update, please retry".to_string(),
            RbError::Validation { message } => message.clone(),
            _ => "internal server error".to_string(),
        }
    }

    /// Storage failure helper used by repository implementations.
    pub fn storage(operation: &str, err: impl std::fmt::Display) -> Self {
        RbError::Storage {
            operation: operation.to_string(),
            message: err.to_string(),
        }
    }

    pub fn log(&self, metadata: &ErrorMetadata) {
        match metadata.severity {
            ErrorSeverity::Low => {
                debug!(
                    error_id = %metadata.error_id,
                    component = %metadata.component,
                    operation = ?metadata.operation,
                    user_id = ?metadata.user_id,
                    client_address = ?metadata.client_address,
                    error = %self,
                    "request rejected"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_id = %metadata.error_id,
                    component = %metadata.component,
                    operation = ?metadata.operation,
                    user_id = ?metadata.user_id,
                    client_address = ?metadata.client_address,
                    error = %self,
                    "request failed"
                );
            }
            ErrorSeverity::High | ErrorSeverity::Critical => {
                error!(
                    error_id = %metadata.error_id,
                    component = %metadata.component,
                    operation = ?metadata.operation,
                    user_id = ?metadata.user_id,
                    client_address = ?metadata.client_address,
                    error = %self,
                    severity = ?metadata.severity,
                    "server error"
                );
            }
        }
    }
}

pub struct ErrorMetadataBuilder {
    metadata: ErrorMetadata,
}

impl ErrorMetadataBuilder {
    pub fn new(component: &str) -> Self {
        Self {
            metadata: ErrorMetadata {
                error_id: uuid::Uuid::new_v4().to_string(),
                severity: ErrorSeverity::Medium,
                component: component.to_string(),
                operation: None,
                user_id: None,
                client_address: None,
                timestamp: chrono::Utc::now(),
            },
        }
    }

    pub fn operation(mut self, operation: &str) -> Self {
        self.metadata.operation = Some(operation.to_string());
        self
    }

    pub fn user_id(mut self, user_id: &str) -> Self {
        self.metadata.user_id = Some(user_id.to_string());
        self
    }

    pub fn client_address(mut self, address: &str) -> Self {
        self.metadata.client_address = Some(address.to_string());
        self
    }

    pub fn build(mut self, error: &RbError) -> ErrorMetadata {
        self.metadata.severity = error.severity();
        self.metadata
    }
}

pub type Result<T> = std::result::Result<T, RbError>;

#[cfg(feature = "axum")]
impl IntoResponse for RbError {
    fn into_response(self) -> axum::response::Response {
        let status_code = StatusCode::from_u16(self.to_http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let body = serde_json::json!({
            "error": self.code(),
            "message": self.user_message()
        });

        (status_code, Json(body)).into_response()
    }
}
