use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Bad request: {0}")]
    BadRequest(anyhow::Error),

    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    #[error("Unauthorized: {0}")]
    Unauthorized(anyhow::Error),

    #[error("Conflict: {0}")]
    Conflict(anyhow::Error),

    #[error("Insufficient funds: {0}")]
    InsufficientFunds(anyhow::Error),

    #[error("Gateway unavailable: {0}")]
    GatewayUnavailable(anyhow::Error),

    #[error("Gateway rejected request: {0}")]
    GatewayRejected(anyhow::Error),

    #[error("Callback could not be resolved: {0}")]
    CallbackUnresolvable(anyhow::Error),

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),

    #[error("Service Unavailable")]
    ServiceUnavailable,

    #[error("Database error: {0}")]
    DatabaseError(anyhow::Error),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseError(anyhow::Error::new(err))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: String,
            #[serde(skip_serializing_if = "Option::is_none")]
            details: Option<String>,
            #[serde(skip_serializing_if = "std::ops::Not::not")]
            retryable: bool,
        }

        let (status, error_message, details, retryable) = match self {
            AppError::ValidationError(err) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "Validation error".to_string(),
                Some(err.to_string()),
                false,
            ),
            AppError::BadRequest(err) => (StatusCode::BAD_REQUEST, err.to_string(), None, false),
            AppError::NotFound(err) => (StatusCode::NOT_FOUND, err.to_string(), None, false),
            AppError::Unauthorized(err) => {
                (StatusCode::UNAUTHORIZED, err.to_string(), None, false)
            }
            AppError::Conflict(err) => (StatusCode::CONFLICT, err.to_string(), None, false),
            AppError::InsufficientFunds(err) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                err.to_string(),
                None,
                false,
            ),
            AppError::GatewayUnavailable(err) => (
                StatusCode::BAD_GATEWAY,
                "Payment gateway unavailable".to_string(),
                Some(err.to_string()),
                true,
            ),
            AppError::GatewayRejected(err) => {
                (StatusCode::BAD_REQUEST, err.to_string(), None, false)
            }
            AppError::CallbackUnresolvable(err) => {
                (StatusCode::NOT_FOUND, err.to_string(), None, true)
            }
            AppError::InternalError(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
                Some(format!("{:#}", err)),
                false,
            ),
            AppError::ServiceUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Service unavailable".to_string(),
                None,
                true,
            ),
            AppError::DatabaseError(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Database error".to_string(),
                Some(err.to_string()),
                false,
            ),
            AppError::ConfigError(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Configuration error".to_string(),
                Some(err.to_string()),
                false,
            ),
        };

        (
            status,
            Json(ErrorResponse {
                error: error_message,
                details,
                retryable,
            }),
        )
            .into_response()
    }
}
