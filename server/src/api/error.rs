//! API error handling.
//!
//! Maps library errors onto HTTP status codes with a JSON `{ "error": ... }` body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use papconv::{LookupError, PapconvError, SubmissionError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    /// The job exists but is not in a state that allows the request.
    #[error("{0}")]
    Conflict(String),

    /// The job failed; the body carries its error.
    #[error("{0}")]
    Unprocessable(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("Internal error: {}", self);
        }

        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<LookupError> for ApiError {
    fn from(err: LookupError) -> Self {
        match err {
            LookupError::NotFound(_) | LookupError::ArtifactNotFound { .. } => {
                ApiError::NotFound(err.to_string())
            }
            LookupError::NotReady { .. } | LookupError::Busy { .. } => {
                ApiError::Conflict(err.to_string())
            }
            LookupError::Failed { .. } => ApiError::Unprocessable(err.to_string()),
            LookupError::Storage(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<SubmissionError> for ApiError {
    fn from(err: SubmissionError) -> Self {
        match err {
            SubmissionError::Validation(_) => ApiError::BadRequest(err.to_string()),
            SubmissionError::Worker(_) => {
                ApiError::Internal(format!("Service is shutting down: {}", err))
            }
            SubmissionError::Storage(_) | SubmissionError::Settings(_) => {
                ApiError::Internal(err.to_string())
            }
        }
    }
}

impl From<PapconvError> for ApiError {
    fn from(err: PapconvError) -> Self {
        match err {
            PapconvError::Lookup(e) => e.into(),
            PapconvError::Submission(e) => e.into(),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
