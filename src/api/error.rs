use axum::{Json, http::StatusCode, response::IntoResponse};
use thiserror::Error;

use super::models::ErrorResponse;
use crate::keys::KeyError;
use crate::ledger::LedgerError;
use crate::queue::QueueError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{message}")]
    NotFound {
        message: String,
        suggestions: Option<Vec<String>>,
    },
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let suggestions = match &self {
            ApiError::NotFound { suggestions, .. } => suggestions.clone(),
            _ => None,
        };
        let body = ErrorResponse {
            error: self.to_string(),
            suggestions,
        };
        (status, Json(body)).into_response()
    }
}

impl From<KeyError> for ApiError {
    fn from(value: KeyError) -> Self {
        ApiError::BadRequest(value.to_string())
    }
}

impl From<LedgerError> for ApiError {
    fn from(value: LedgerError) -> Self {
        ApiError::Internal(value.to_string())
    }
}

impl From<QueueError> for ApiError {
    fn from(value: QueueError) -> Self {
        ApiError::Internal(value.to_string())
    }
}
