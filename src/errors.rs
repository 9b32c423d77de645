use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Error body returned by every failing endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Unprocessable Entity",
    "message": "Insufficient stock for \"Dune\": requested 3, available 1",
    "request_id": "req-abc123xyz",
    "timestamp": "2024-12-09T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// Additional error details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// ISO 8601 timestamp when the error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Insufficient stock for \"{title}\": requested {requested}, available {available}")]
    InsufficientStock {
        book_id: Uuid,
        title: String,
        requested: i32,
        available: i32,
    },

    /// A conditional decrement lost the race after validation passed.
    #[error("Stock changed during checkout: {0}")]
    StockConflict(String),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Order {0} has already been cancelled")]
    OrderAlreadyCancelled(Uuid),

    #[error("Order {0} has already been delivered and cannot be cancelled")]
    OrderAlreadyDelivered(Uuid),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Payment failed: {0}")]
    PaymentFailed(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ServiceError::ExternalServiceError(format!("payment gateway timed out: {}", err))
        } else if err.is_decode() {
            ServiceError::ExternalServiceError(format!(
                "payment gateway returned an unreadable body: {}",
                err
            ))
        } else {
            ServiceError::ExternalServiceError(format!("payment gateway unreachable: {}", err))
        }
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::SerializationError(err.to_string())
    }
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DatabaseError(_) | Self::SerializationError(_) | Self::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) | Self::EmptyCart | Self::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::InsufficientStock { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::StockConflict(_)
            | Self::InvalidTransition { .. }
            | Self::OrderAlreadyCancelled(_)
            | Self::OrderAlreadyDelivered(_) => StatusCode::CONFLICT,
            Self::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
            Self::PaymentFailed(_) => StatusCode::PAYMENT_REQUIRED,
            Self::InvalidSignature(_) | Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal and gateway errors return generic messages.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::SerializationError(_) | Self::InternalError(_) => {
                "Internal server error".to_string()
            }
            Self::ExternalServiceError(_) | Self::PaymentFailed(_) => {
                "Payment could not be processed, please try again later".to_string()
            }
            Self::InvalidSignature(_) => "Invalid signature".to_string(),
            _ => self.to_string(),
        }
    }

    /// Whether the caller may retry the same request later.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::ExternalServiceError(_) | Self::DatabaseError(_) | Self::StockConflict(_)
        )
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_message = self.response_message();

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: error_message,
            details: None,
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}
