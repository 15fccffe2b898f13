use axum::http::StatusCode;
use serde_json::json;
use thiserror::Error;

use shared_models::AppError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CalendarError {
    #[error("Invalid working hours policy: {reason}")]
    InvalidPolicy { reason: String },

    #[error("Invalid time '{0}', expected HH:MM")]
    InvalidTime(String),
}

impl CalendarError {
    pub fn invalid_policy(reason: impl Into<String>) -> Self {
        CalendarError::InvalidPolicy { reason: reason.into() }
    }
}

impl From<CalendarError> for AppError {
    fn from(err: CalendarError) -> Self {
        match &err {
            CalendarError::InvalidPolicy { reason } => AppError::coded(
                StatusCode::UNPROCESSABLE_ENTITY,
                "INVALID_POLICY",
                err.to_string(),
                json!({ "reason": reason }),
            ),
            CalendarError::InvalidTime(_) => AppError::BadRequest(err.to_string()),
        }
    }
}
