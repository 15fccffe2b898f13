use axum::http::StatusCode;
use serde_json::json;
use thiserror::Error;

use scheduling_cell::CalendarError;
use shared_models::{AppError, ClinicianId};

use crate::models::{LedgerKey, SlotRef};

#[derive(Error, Debug)]
pub enum LedgerStoreError {
    #[error("Redis connection error: {0}")]
    RedisError(#[from] redis::RedisError),

    #[error("Redis pool error: {0}")]
    PoolError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Corrupt ledger record '{0}'")]
    CorruptRecord(String),
}

#[derive(Error, Debug)]
pub enum BookingError {
    #[error("Working hours for clinician {clinician_id} are misconfigured: {reason}")]
    InvalidPolicy { clinician_id: ClinicianId, reason: String },

    #[error("{slot} is not a bookable slot")]
    InvalidSlot { slot: SlotRef },

    #[error("{slot} is fully booked")]
    SlotUnavailable { slot: SlotRef },

    #[error("Timed out after {waited_ms} ms waiting for ledger {key}")]
    Timeout { key: LedgerKey, waited_ms: u64 },

    #[error("Reservation #{serial_number} not found in ledger {key}")]
    NotFound { key: LedgerKey, serial_number: u32 },

    #[error("Idempotency key '{idempotency_key}' was already used for a different booking")]
    IdempotencyMismatch { idempotency_key: String, existing_serial: u32 },

    #[error("Invalid booking request: {0}")]
    InvalidRequest(String),

    #[error("Ledger store error: {0}")]
    Store(#[from] LedgerStoreError),
}

impl BookingError {
    pub fn from_calendar(clinician_id: &ClinicianId, err: CalendarError) -> Self {
        match err {
            CalendarError::InvalidPolicy { reason } => BookingError::InvalidPolicy {
                clinician_id: clinician_id.clone(),
                reason,
            },
            other => BookingError::InvalidRequest(other.to_string()),
        }
    }

    /// Stable code used on the wire and in notifications.
    pub fn code(&self) -> &'static str {
        match self {
            BookingError::InvalidPolicy { .. } => "INVALID_POLICY",
            BookingError::InvalidSlot { .. } => "INVALID_SLOT",
            BookingError::SlotUnavailable { .. } => "SLOT_UNAVAILABLE",
            BookingError::Timeout { .. } => "TIMEOUT",
            BookingError::NotFound { .. } => "NOT_FOUND",
            BookingError::IdempotencyMismatch { .. } => "IDEMPOTENCY_MISMATCH",
            BookingError::InvalidRequest(_) => "INVALID_REQUEST",
            BookingError::Store(_) => "STORE_ERROR",
        }
    }

    /// Contention failures a caller may retry as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BookingError::Timeout { .. })
    }

    pub fn status(&self) -> StatusCode {
        match self {
            BookingError::InvalidPolicy { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            BookingError::InvalidSlot { .. } => StatusCode::BAD_REQUEST,
            BookingError::SlotUnavailable { .. } => StatusCode::CONFLICT,
            BookingError::Timeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
            BookingError::NotFound { .. } => StatusCode::NOT_FOUND,
            BookingError::IdempotencyMismatch { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            BookingError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            BookingError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<BookingError> for AppError {
    fn from(err: BookingError) -> Self {
        let details = match &err {
            BookingError::InvalidPolicy { clinician_id, reason } => json!({
                "clinician_id": clinician_id,
                "reason": reason
            }),
            BookingError::InvalidSlot { slot } => json!({
                "slot": slot,
                "action": "re-query availability and choose a listed time"
            }),
            BookingError::SlotUnavailable { slot } => json!({
                "slot": slot,
                "action": "re-query availability and choose a different slot"
            }),
            BookingError::Timeout { key, waited_ms } => json!({
                "clinician_id": key.clinician_id,
                "date": key.date,
                "waited_ms": waited_ms,
                "retryable": true
            }),
            BookingError::NotFound { key, serial_number } => json!({
                "clinician_id": key.clinician_id,
                "date": key.date,
                "serial_number": serial_number
            }),
            BookingError::IdempotencyMismatch { idempotency_key, existing_serial } => json!({
                "idempotency_key": idempotency_key,
                "existing_serial": existing_serial
            }),
            BookingError::InvalidRequest(_) | BookingError::Store(_) => json!({}),
        };

        let message = match &err {
            // Store internals stay in the logs
            BookingError::Store(inner) => {
                tracing::error!("Ledger store failure: {}", inner);
                "Booking storage is unavailable".to_string()
            }
            other => other.to_string(),
        };

        AppError::coded(err.status(), err.code(), message, details)
    }
}
