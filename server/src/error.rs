use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::models::job::JobStatus;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrackerError {
    #[error("job {0} not found")]
    NotFound(String),

    #[error("job {job_id} is already {from}, cannot move to {to}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },
}

/// Errors rendered to HTTP clients as `{"detail": ...}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Job not found")]
    JobNotFound,

    #[error("{0}")]
    Generation(String),

    #[error("{0}")]
    Internal(String),
}

impl From<TrackerError> for ApiError {
    fn from(err: TrackerError) -> Self {
        match err {
            TrackerError::NotFound(_) => ApiError::JobNotFound,
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::JobNotFound => StatusCode::NOT_FOUND,
            ApiError::Generation(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}
