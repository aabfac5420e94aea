use crate::error::EmailError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Error body returned by every dev server endpoint
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum DevServerError {
    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Unprocessable Entity: {0}")]
    Unprocessable(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),
}

impl From<EmailError> for DevServerError {
    fn from(err: EmailError) -> Self {
        match err {
            EmailError::InvalidTemplateName(_) => DevServerError::BadRequest(err.to_string()),
            EmailError::TemplateNotFound(_) => DevServerError::NotFound(err.to_string()),
            EmailError::TemplateParse { .. } | EmailError::TemplateRender { .. } => {
                DevServerError::Unprocessable(err.to_string())
            }
            other => DevServerError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for DevServerError {
    fn into_response(self) -> Response {
        let (status, error, message) = match self {
            DevServerError::BadRequest(m) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", m),
            DevServerError::NotFound(m) => (StatusCode::NOT_FOUND, "NOT_FOUND", m),
            DevServerError::Unprocessable(m) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "UNPROCESSABLE_ENTITY", m)
            }
            DevServerError::Internal(m) => {
                tracing::error!(error = %m, "Dev server request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_SERVER_ERROR", m)
            }
        };

        (status, Json(ErrorResponse { error, message })).into_response()
    }
}
