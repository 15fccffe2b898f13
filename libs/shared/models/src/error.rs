use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Bad Request: {0}")]
    BadRequest(String),

    /// Domain failure carrying a stable error code and structured details
    /// the client can act on without another round trip.
    #[error("{message}")]
    Coded {
        status: StatusCode,
        code: &'static str,
        message: String,
        details: Value,
    },
}

impl AppError {
    pub fn coded(status: StatusCode, code: &'static str, message: impl Into<String>, details: Value) -> Self {
        AppError::Coded {
            status,
            code,
            message: message.into(),
            details,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Coded { status, .. } => *status,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        let body = match self {
            AppError::Coded { code, message, details, .. } => {
                tracing::warn!("Error: {} [{}]: {}", status, code, message);
                json!({
                    "error": message,
                    "code": code,
                    "details": details
                })
            }
            AppError::NotFound(msg) | AppError::BadRequest(msg) => {
                tracing::error!("Error: {}: {}", status, msg);
                json!({
                    "error": msg
                })
            }
        };

        (status, Json(body)).into_response()
    }
}
