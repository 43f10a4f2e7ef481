use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::db::StoreError;
use crate::services::identity::IdentityError;
use crate::services::payment::GatewayError;
use crate::services::storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    InvalidState(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    RateLimited(String),
    #[error("{0}")]
    UpstreamRejected(String),
    #[error("{0}")]
    UpstreamUnavailable(String),
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::InvalidState(_) => StatusCode::BAD_REQUEST,
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::UpstreamRejected(_) => StatusCode::BAD_GATEWAY,
            AppError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable reason string clients can branch on.
    pub fn reason(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "not_found",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::Forbidden(_) => "forbidden",
            AppError::Conflict(_) => "conflict",
            AppError::InvalidState(_) => "invalid_state",
            AppError::Validation(_) => "validation",
            AppError::RateLimited(_) => "rate_limited",
            AppError::UpstreamRejected(_) => "upstream_rejected",
            AppError::UpstreamUnavailable(_) => "upstream_unavailable",
            AppError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(reason = self.reason(), "request failed: {self}");
        }
        let body = Json(json!({
            "error": {
                "code": status.as_u16(),
                "reason": self.reason(),
                "message": self.to_string(),
            }
        }));
        (status, body).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::DuplicatePaymentRef => {
                AppError::Conflict("Payment reference is already assigned to another listing".to_string())
            }
            StoreError::Missing(id) => AppError::NotFound(format!("Property {id} not found")),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<GatewayError> for AppError {
    fn from(value: GatewayError) -> Self {
        match value {
            GatewayError::RateLimited { .. } => {
                AppError::RateLimited("Payment service is rate limiting requests. Please try again later.".to_string())
            }
            GatewayError::Rejected { status, detail } => {
                AppError::UpstreamRejected(format!("Payment service rejected the request ({status}): {detail}"))
            }
            GatewayError::Unavailable(_) => AppError::UpstreamUnavailable(
                "Payment service is currently unavailable. Please try again later.".to_string(),
            ),
            GatewayError::Malformed(detail) => {
                AppError::Internal(format!("Malformed response from payment service: {detail}"))
            }
        }
    }
}

impl From<IdentityError> for AppError {
    fn from(value: IdentityError) -> Self {
        match value {
            IdentityError::InvalidToken | IdentityError::Rejected => {
                AppError::Unauthorized("Could not validate credentials".to_string())
            }
            IdentityError::Unavailable(_) => {
                AppError::UpstreamUnavailable("User management service is currently unavailable".to_string())
            }
            IdentityError::Malformed(detail) => {
                AppError::Internal(format!("Malformed response from user management service: {detail}"))
            }
        }
    }
}

impl From<StorageError> for AppError {
    fn from(value: StorageError) -> Self {
        AppError::UpstreamUnavailable(format!("File upload failed: {value}"))
    }
}
