use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

pub type AppResult<T> = Result<T, AppError>;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden: {message}")]
    Forbidden {
        message: String,
        resource: Option<String>,
        rule_type: Option<String>,
        user_role: Option<String>,
    },
    /// Rule store unreachable or timed out. Rendered to the caller as a
    /// generic denial (fail-closed); the detail only reaches server logs.
    #[error("rule store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("token error: {0}")]
    Token(String),
    #[error("database error")]
    Database(#[from] sqlx::Error),
    #[error("internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
            resource: None,
            rule_type: None,
            user_role: None,
        }
    }

    /// Denial carrying the resource/rule-type context required by the 403
    /// response contract.
    pub fn forbidden_resource(
        message: impl Into<String>,
        resource: impl Into<String>,
        rule_type: impl Into<String>,
        user_role: Option<String>,
    ) -> Self {
        Self::Forbidden {
            message: message.into(),
            resource: Some(resource.into()),
            rule_type: Some(rule_type.into()),
            user_role,
        }
    }

    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn token(err: impl Into<String>) -> Self {
        Self::Token(err.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    resource: Option<String>,
    #[serde(rename = "ruleType", skip_serializing_if = "Option::is_none")]
    rule_type: Option<String>,
    #[serde(rename = "userRole", skip_serializing_if = "Option::is_none")]
    user_role: Option<String>,
}

impl ErrorResponse {
    fn simple(error: &str, message: String) -> Self {
        Self {
            error: error.to_string(),
            message,
            resource: None,
            rule_type: None,
            user_role: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, payload) = match self {
            AppError::Unauthorized(message) => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse::simple("unauthorized", format!("unauthorized: {message}")),
            ),
            AppError::Forbidden {
                message,
                resource,
                rule_type,
                user_role,
            } => (
                StatusCode::FORBIDDEN,
                ErrorResponse {
                    error: "forbidden".to_string(),
                    message,
                    resource,
                    rule_type,
                    user_role,
                },
            ),
            AppError::StoreUnavailable(detail) => {
                // Fail closed: an indeterminate rule store must never turn
                // into an allow, and the driver detail must never reach the
                // response body.
                tracing::error!(detail = %detail, "rule store unavailable, denying request");
                (
                    StatusCode::FORBIDDEN,
                    ErrorResponse::simple("forbidden", "access denied".to_string()),
                )
            }
            AppError::NotFound(message) => (
                StatusCode::NOT_FOUND,
                ErrorResponse::simple("not_found", format!("not found: {message}")),
            ),
            AppError::Conflict(message) => (
                StatusCode::CONFLICT,
                ErrorResponse::simple("conflict", format!("conflict: {message}")),
            ),
            AppError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::simple("bad_request", format!("bad request: {message}")),
            ),
            AppError::Configuration(message) => {
                tracing::error!(detail = %message, "configuration error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::simple("configuration", "internal server error".to_string()),
                )
            }
            AppError::Token(message) => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse::simple("token", format!("token error: {message}")),
            ),
            AppError::Database(err) => {
                tracing::error!(detail = %err, "database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::simple("database", "internal server error".to_string()),
                )
            }
            AppError::Internal(message) => {
                tracing::error!(detail = %message, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::simple("internal", "internal server error".to_string()),
                )
            }
        };

        (status, Json(payload)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        Self::Internal(value.to_string())
    }
}
