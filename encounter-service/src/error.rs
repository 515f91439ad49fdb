use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

use encounter_session::StateValidationError;

/// Error body returned to clients
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: String,
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("User identity required (X-User-Id header)")]
    MissingIdentity,

    #[error("Encounter not found")]
    NotFound,

    #[error("No active or paused encounters found")]
    NoActiveEncounter,

    #[error("Encounter does not belong to this user")]
    Forbidden,

    #[error("{0}")]
    Conflict(String),

    #[error("Invalid encounter state: {0}")]
    InvalidState(#[from] StateValidationError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Failed to persist encounters: {0}")]
    Persistence(String),
}

impl ServiceError {
    pub fn conflict(message: impl Into<String>) -> Self {
        ServiceError::Conflict(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::MissingIdentity | ServiceError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotFound | ServiceError::NoActiveEncounter => StatusCode::NOT_FOUND,
            ServiceError::Forbidden => StatusCode::FORBIDDEN,
            ServiceError::Conflict(_) => StatusCode::CONFLICT,
            ServiceError::InvalidState(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Encounter service error: {}", self);
        }

        let body = ErrorResponse {
            detail: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
