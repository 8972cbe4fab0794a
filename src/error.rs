use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("slot is fully booked")]
    CapacityExceeded,
    #[error("slot is not bookable")]
    SlotNotBookable,
    #[error("hold expired before confirmation")]
    HoldExpired,
    #[error("customer already has an active booking in this time window")]
    DuplicateBooking,
    #[error("booking not found")]
    BookingNotFound,
    #[error("invalid state transition")]
    InvalidStateTransition,
    #[error("invalid webhook signature")]
    InvalidSignature,
    #[error("webhook secret not configured")]
    WebhookNotConfigured,
    #[error("open slot limit reached")]
    SlotQuotaReached,
    #[error("invalid or expired token")]
    InvalidToken,
    #[error("not found")]
    NotFound,
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("{0}")]
    Message(String),
}

impl AppError {
    /// Stable machine-readable code carried in the JSON error body.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Db(_) | AppError::Message(_) => "internal",
            AppError::CapacityExceeded => "slot_full",
            AppError::SlotNotBookable => "not_bookable",
            AppError::HoldExpired => "hold_expired",
            AppError::DuplicateBooking => "duplicate_booking",
            AppError::BookingNotFound => "booking_not_found",
            AppError::InvalidStateTransition => "invalid_state",
            AppError::InvalidSignature => "invalid_signature",
            AppError::WebhookNotConfigured => "webhook_not_configured",
            AppError::SlotQuotaReached => "limit_reached",
            AppError::InvalidToken => "invalid_token",
            AppError::NotFound => "not_found",
            AppError::Unauthorized => "unauthorized",
            AppError::Forbidden => "forbidden",
            AppError::BadRequest(_) => "bad_request",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::NotFound | AppError::BookingNotFound => StatusCode::NOT_FOUND,
            AppError::Unauthorized | AppError::InvalidSignature => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::BadRequest(_) | AppError::InvalidToken => StatusCode::BAD_REQUEST,
            AppError::CapacityExceeded
            | AppError::SlotNotBookable
            | AppError::HoldExpired
            | AppError::DuplicateBooking
            | AppError::InvalidStateTransition
            | AppError::SlotQuotaReached => StatusCode::CONFLICT,
            AppError::WebhookNotConfigured => StatusCode::NOT_IMPLEMENTED,
            AppError::Db(_) | AppError::Message(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        match &self {
            AppError::InvalidSignature => {
                tracing::warn!(kind = "signature_rejected", "webhook signature verification failed")
            }
            AppError::Db(_) | AppError::Message(_) => tracing::error!(?self),
            _ => tracing::debug!(?self),
        }
        (status, Json(json!({ "error": self.code() }))).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
