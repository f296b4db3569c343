use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use dermascan_model::{ArtifactError, ClassifierError, PreprocessError};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("Invalid file type. Please upload an image.")]
    InvalidMediaType,
    #[error("Missing multipart field 'file'")]
    MissingFile,
    #[error("Invalid upload: {message}")]
    Upload { status: StatusCode, message: String },
    #[error("Model artifact missing: {0}")]
    ArtifactMissing(String),
    #[error("Model artifact corrupt: {0}")]
    ArtifactCorrupt(String),
    #[error(transparent)]
    Decode(#[from] PreprocessError),
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
    #[error("Model returned {actual} probabilities for {expected} labels")]
    OutputMismatch { expected: usize, actual: usize },
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServeError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServeError::InvalidMediaType => StatusCode::BAD_REQUEST,
            ServeError::MissingFile => StatusCode::UNPROCESSABLE_ENTITY,
            ServeError::Upload { status, .. } => *status,
            ServeError::ArtifactMissing(_)
            | ServeError::ArtifactCorrupt(_)
            | ServeError::Decode(_)
            | ServeError::Classifier(_)
            | ServeError::OutputMismatch { .. }
            | ServeError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ArtifactError> for ServeError {
    fn from(err: ArtifactError) -> Self {
        tracing::debug!(path = %err.path().display(), "Model artifact unavailable");
        match err {
            ArtifactError::Missing { .. } => ServeError::ArtifactMissing(err.to_string()),
            ArtifactError::Io { .. } | ArtifactError::Corrupt { .. } => {
                ServeError::ArtifactCorrupt(err.to_string())
            }
        }
    }
}

impl From<axum::extract::multipart::MultipartError> for ServeError {
    fn from(err: axum::extract::multipart::MultipartError) -> Self {
        ServeError::Upload {
            status: err.status(),
            message: err.body_text(),
        }
    }
}

/// A body that is not `multipart/form-data` carries no `file` field at all.
impl From<axum::extract::multipart::MultipartRejection> for ServeError {
    fn from(err: axum::extract::multipart::MultipartRejection) -> Self {
        tracing::debug!("Rejected non-multipart body: {}", err.body_text());
        ServeError::MissingFile
    }
}

impl IntoResponse for ServeError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {self}");
        } else {
            tracing::warn!("Request rejected: {self}");
        }
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}
