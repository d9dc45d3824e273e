use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::{DbErr, SqlErr};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Error body returned by every endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Bad Request",
    "code": "cart_empty",
    "message": "Your cart is empty.",
    "request_id": "req-abc123xyz",
    "timestamp": "2025-03-01T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request")
    #[schema(example = "Bad Request")]
    pub error: String,
    /// Stable, machine-readable reason code
    #[schema(example = "cart_empty")]
    pub code: String,
    /// Human-readable error description
    #[schema(example = "Your cart is empty.")]
    pub message: String,
    /// Unique request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = "req-abc123xyz")]
    pub request_id: Option<String>,
    /// RFC 3339 timestamp when the error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Validation error: {0}")]
    ValidationError(String),

    // Order assembly
    #[error("Your cart is empty.")]
    CartEmpty,

    #[error("No available movies in cart.")]
    NoAvailableItems,

    #[error("All movies are already purchased.")]
    AllAlreadyPurchased,

    #[error("All movies are already pending in another order.")]
    AllAlreadyPending,

    // Order state machine
    #[error("Order is already canceled.")]
    AlreadyCanceled,

    #[error("Paid orders cannot be canceled directly. Please request a refund.")]
    RefundRequired,

    #[error("Order {0} is no longer pending")]
    OrderNotPending(Uuid),

    // Refund workflow
    #[error("Only paid orders can be refunded.")]
    OrderNotPaid,

    #[error("Refund request already submitted.")]
    RefundAlreadyRequested,

    // Cart
    #[error("Movie already purchased")]
    AlreadyPurchased(Uuid),

    #[error("Movie already in cart")]
    AlreadyInCart(Uuid),

    #[error("Order {0} not found")]
    OrderNotFound(Uuid),

    #[error("Movie {0} not found")]
    MovieNotFound(Uuid),

    #[error("Movie {0} is not in the cart")]
    NotInCart(Uuid),

    #[error("Payment {0} not found")]
    PaymentNotFound(Uuid),

    #[error("Conflict: {0}")]
    Conflict(String),

    // Payment gateway
    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("Malformed gateway event: {0}")]
    MalformedEvent(String),

    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DatabaseError(_) | Self::InternalError(_) | Self::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::ValidationError(_)
            | Self::CartEmpty
            | Self::NoAvailableItems
            | Self::AllAlreadyPurchased
            | Self::AllAlreadyPending
            | Self::AlreadyCanceled
            | Self::RefundRequired
            | Self::OrderNotPending(_)
            | Self::OrderNotPaid
            | Self::RefundAlreadyRequested
            | Self::AlreadyPurchased(_)
            | Self::AlreadyInCart(_)
            | Self::MalformedEvent(_)
            | Self::InvalidSignature => StatusCode::BAD_REQUEST,
            Self::OrderNotFound(_)
            | Self::MovieNotFound(_)
            | Self::NotInCart(_)
            | Self::PaymentNotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::GatewayUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        }
    }

    /// Machine-readable reason code carried in the error body.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) => "database_error",
            Self::ValidationError(_) => "validation_error",
            Self::CartEmpty => "cart_empty",
            Self::NoAvailableItems => "no_available_items",
            Self::AllAlreadyPurchased => "all_already_purchased",
            Self::AllAlreadyPending => "all_already_pending",
            Self::AlreadyCanceled => "already_canceled",
            Self::RefundRequired => "requires_refund",
            Self::OrderNotPending(_) => "order_not_pending",
            Self::OrderNotPaid => "not_paid",
            Self::RefundAlreadyRequested => "already_requested",
            Self::AlreadyPurchased(_) => "already_purchased",
            Self::AlreadyInCart(_) => "already_in_cart",
            Self::OrderNotFound(_) => "order_not_found",
            Self::MovieNotFound(_) => "movie_not_found",
            Self::NotInCart(_) => "not_in_cart",
            Self::PaymentNotFound(_) => "payment_not_found",
            Self::Conflict(_) => "conflict",
            Self::GatewayUnavailable(_) => "gateway_unavailable",
            Self::MalformedEvent(_) => "malformed_event",
            Self::InvalidSignature => "invalid_signature",
            Self::Unauthorized(_) => "unauthorized",
            Self::InternalError(_) | Self::Other(_) => "internal_error",
        }
    }

    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::GatewayUnavailable(_) | Self::DatabaseError(_) | Self::InternalError(_)
        )
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) | Self::Other(_) => "Internal server error".to_string(),
            Self::GatewayUnavailable(_) => {
                "Payment gateway is temporarily unavailable, please retry".to_string()
            }
            _ => self.to_string(),
        }
    }

    /// True when the database rejected a write because of a unique index.
    pub fn is_unique_violation(err: &DbErr) -> bool {
        matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
    }

    /// Converts a unique-constraint violation into `conflict`, leaving every other
    /// database error untouched.
    pub fn from_write(err: DbErr, conflict: impl FnOnce() -> ServiceError) -> ServiceError {
        if Self::is_unique_violation(&err) {
            conflict()
        } else {
            ServiceError::DatabaseError(err)
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "request failed");
        }

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            code: self.code().to_string(),
            message: self.response_message(),
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

/// Errors raised while bootstrapping the application
pub type AppError = ServiceError;
