//! Application error type mapping to HTTP status codes and envelope format.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use piecework_core::trigger::WebhookDeliveryError;
use piecework_types::error::DispatchError;

use super::response::{ApiResponse, new_request_id};

#[derive(Debug)]
pub enum AppError {
    /// The job could not be queued.
    Dispatch(DispatchError),
    /// The webhook cannot be delivered to any trigger.
    Webhook(WebhookDeliveryError),
    Validation(String),
}

impl From<DispatchError> for AppError {
    fn from(e: DispatchError) -> Self {
        AppError::Dispatch(e)
    }
}

impl From<WebhookDeliveryError> for AppError {
    fn from(e: WebhookDeliveryError) -> Self {
        AppError::Webhook(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AppError::Dispatch(DispatchError::QueueFull) => {
                (StatusCode::SERVICE_UNAVAILABLE, "QUEUE_FULL")
            }
            AppError::Dispatch(DispatchError::QueueClosed) => {
                (StatusCode::SERVICE_UNAVAILABLE, "SHUTTING_DOWN")
            }
            AppError::Dispatch(_) => (StatusCode::BAD_GATEWAY, "DISPATCH_ERROR"),
            AppError::Webhook(WebhookDeliveryError::NotEnabled(_)) => {
                (StatusCode::NOT_FOUND, "TRIGGER_NOT_ENABLED")
            }
            AppError::Webhook(WebhookDeliveryError::PollingTrigger(_)) => {
                (StatusCode::CONFLICT, "NOT_A_WEBHOOK_TRIGGER")
            }
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
        };

        let message = match self {
            AppError::Dispatch(e) => e.to_string(),
            AppError::Webhook(e) => e.to_string(),
            AppError::Validation(msg) => msg,
        };

        ApiResponse::error(status, code, message, new_request_id()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        let cases = [
            (AppError::from(DispatchError::QueueFull), StatusCode::SERVICE_UNAVAILABLE),
            (AppError::from(DispatchError::QueueClosed), StatusCode::SERVICE_UNAVAILABLE),
            (
                AppError::from(WebhookDeliveryError::NotEnabled("f".to_string())),
                StatusCode::NOT_FOUND,
            ),
            (
                AppError::from(WebhookDeliveryError::PollingTrigger("f".to_string())),
                StatusCode::CONFLICT,
            ),
            (AppError::Validation("bad".to_string()), StatusCode::BAD_REQUEST),
        ];
        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }
    }
}
