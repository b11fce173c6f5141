//! Mapping from domain errors to HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use pce_core::{FulfillmentError, OrchestratorError, QueueError, ReturnError, StoreError};

/// Body of every error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// An error on its way out of a handler.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    fn internal(message: impl Into<String>) -> Self {
        let message = message.into();
        error!(error = %message, "Request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

impl From<OrchestratorError> for ApiError {
    fn from(e: OrchestratorError) -> Self {
        match e {
            OrchestratorError::NotFound(_) => Self::not_found(e.to_string()),
            OrchestratorError::InvalidTransition(_) | OrchestratorError::ConcurrencyConflict(_) => {
                Self::new(StatusCode::CONFLICT, e.to_string())
            }
            OrchestratorError::InvalidRequest(_) => Self::bad_request(e.to_string()),
            OrchestratorError::Queue(q) => q.into(),
            other => Self::internal(other.to_string()),
        }
    }
}

impl From<FulfillmentError> for ApiError {
    fn from(e: FulfillmentError) -> Self {
        match e {
            FulfillmentError::NotFound(_) => Self::not_found(e.to_string()),
            FulfillmentError::PipelineCancelled(_)
            | FulfillmentError::TrackingNumberImmutable { .. }
            | FulfillmentError::InvalidStatus { .. } => {
                Self::new(StatusCode::CONFLICT, e.to_string())
            }
            FulfillmentError::InvalidOrder(_) => Self::bad_request(e.to_string()),
            FulfillmentError::Store(s) => s.into(),
            FulfillmentError::Provider(_) => Self::internal(e.to_string()),
        }
    }
}

impl From<ReturnError> for ApiError {
    fn from(e: ReturnError) -> Self {
        match e {
            ReturnError::NotFound(_) => Self::not_found(e.to_string()),
            ReturnError::InvalidTransition { .. } => Self::new(StatusCode::CONFLICT, e.to_string()),
            ReturnError::InvalidRequest(_) => Self::bad_request(e.to_string()),
            ReturnError::Store(s) => s.into(),
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::UnknownQueue(_) | QueueError::JobNotFound(_) => {
                Self::not_found(e.to_string())
            }
            QueueError::Payload(_) => Self::bad_request(e.to_string()),
            QueueError::LeaseLost(_) => Self::new(StatusCode::CONFLICT, e.to_string()),
            QueueError::Store(s) => s.into(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(_) => Self::not_found(e.to_string()),
            StoreError::Conflict(_) => Self::new(StatusCode::CONFLICT, e.to_string()),
            other => Self::internal(other.to_string()),
        }
    }
}
