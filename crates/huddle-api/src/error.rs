use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use huddle_core::DeliveryError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("missing or invalid credentials")]
    Unauthorized,

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Delivery(DeliveryError::Authentication) | Self::Unauthorized => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED")
            }
            Self::Delivery(DeliveryError::Permission(_)) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            Self::Delivery(DeliveryError::Persistence(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "PERSISTENCE_ERROR")
            }
            Self::Delivery(DeliveryError::Validation(_)) | Self::Validation(_) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR")
            }
            Self::Delivery(DeliveryError::NotFound(_)) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        // Store and internal details stay in the log, not the response.
        let message = if status.is_server_error() {
            error!("{}", self);
            match self {
                Self::Delivery(DeliveryError::Persistence(_)) => "could not be stored, retry".to_string(),
                _ => "internal error".to_string(),
            }
        } else {
            self.to_string()
        };

        (status, Json(ErrorResponse { error: ErrorBody { code, message } })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_errors_map_to_http_statuses() {
        let cases = [
            (ApiError::from(DeliveryError::Authentication), StatusCode::UNAUTHORIZED),
            (ApiError::from(DeliveryError::Permission("x".into())), StatusCode::FORBIDDEN),
            (
                ApiError::from(DeliveryError::Persistence(anyhow::anyhow!("disk full"))),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (ApiError::from(DeliveryError::Validation("x".into())), StatusCode::BAD_REQUEST),
            (ApiError::from(DeliveryError::NotFound("message")), StatusCode::NOT_FOUND),
            (ApiError::Conflict("taken".into()), StatusCode::CONFLICT),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }
}
