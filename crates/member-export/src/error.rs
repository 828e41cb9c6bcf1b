use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },
    #[error("source unavailable: {0}")]
    Source(String),
    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ExportError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        ExportError::NotFound { kind, id: id.into() }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ExportError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ExportError::NotFound { .. } => StatusCode::NOT_FOUND,
            ExportError::Source(_) => StatusCode::SERVICE_UNAVAILABLE,
            ExportError::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            ExportError::InvalidRequest(_) => "invalid_request",
            ExportError::NotFound { .. } => "not_found",
            ExportError::Source(_) => "source_unavailable",
            ExportError::Encode(_) => "internal_error",
        }
    }
}

#[derive(Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl IntoResponse for ExportError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = ErrorEnvelope {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}
