//! Error types and handling
//!
//! Layer errors fold into `AppError`, which renders as a JSON error body
//! with a mapped status code.

use crate::capture::CaptureError;
use crate::recorder::RecordingError;
use crate::storage::StorageError;
use crate::store::StoreError;
use crate::upload::UploadError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Recording(#[from] RecordingError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{0}")]
    NotFound(String),

    #[error("Object storage not configured")]
    StorageUnavailable,

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Forbidden(String),

    /// A failure whose message is safe to show; details are logged
    #[error("{0}")]
    Internal(String),
}

fn capture_status(error: &CaptureError) -> StatusCode {
    match error {
        CaptureError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        CaptureError::DeviceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        CaptureError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Capture(CaptureError::PermissionDenied(_)) => "PERMISSION_DENIED",
            AppError::Capture(CaptureError::DeviceUnavailable(_)) => "DEVICE_UNAVAILABLE",
            AppError::Capture(_) => "CAPTURE_ERROR",
            AppError::Recording(RecordingError::Capture(CaptureError::PermissionDenied(_))) => {
                "PERMISSION_DENIED"
            }
            AppError::Recording(RecordingError::Capture(CaptureError::DeviceUnavailable(_))) => {
                "DEVICE_UNAVAILABLE"
            }
            AppError::Recording(RecordingError::NotRecording) => "NOT_RECORDING",
            AppError::Recording(RecordingError::InvalidTransition { .. }) => "INVALID_TRANSITION",
            AppError::Recording(RecordingError::Upload(_)) | AppError::Upload(_) => "UPLOAD_FAILED",
            AppError::Recording(RecordingError::Encoding(_)) => "ENCODING_ERROR",
            AppError::Recording(_) => "RECORDING_ERROR",
            AppError::Storage(StorageError::NotFound(_)) | AppError::NotFound(_) => "NOT_FOUND",
            AppError::Storage(StorageError::Unavailable) | AppError::StorageUnavailable => {
                "STORAGE_UNAVAILABLE"
            }
            AppError::Storage(StorageError::Forbidden(_)) | AppError::Forbidden(_) => "FORBIDDEN",
            AppError::Storage(StorageError::InvalidPath(_)) | AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::Storage(_) => "STORAGE_ERROR",
            AppError::Store(_) => "STORE_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Capture(e) | AppError::Recording(RecordingError::Capture(e)) => capture_status(e),
            AppError::Recording(RecordingError::NotRecording)
            | AppError::Recording(RecordingError::InvalidTransition { .. }) => StatusCode::CONFLICT,
            AppError::Recording(RecordingError::Upload(_)) | AppError::Upload(_) => StatusCode::BAD_GATEWAY,
            AppError::Storage(StorageError::NotFound(_)) | AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Storage(StorageError::Forbidden(_)) | AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Storage(StorageError::InvalidPath(_)) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error body returned by the HTTP surface
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl From<&AppError> for ErrorResponse {
    fn from(error: &AppError) -> Self {
        ErrorResponse {
            error: error.to_string(),
            code: error.code().to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{} ({})", self, self.code());
        } else {
            tracing::debug!("{} ({})", self, self.code());
        }
        (status, Json(ErrorResponse::from(&self))).into_response()
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Extension trait for logging an error and replacing it with a public one
pub trait LogErr<T> {
    /// Log the error with context and return `Internal(message)`
    fn log_500(self, context: &str, message: &str) -> AppResult<T>;

    /// Log the error with context and return the given error
    fn log_as(self, context: &str, error: AppError) -> AppResult<T>;
}

impl<T, E: std::fmt::Display> LogErr<T> for Result<T, E> {
    fn log_500(self, context: &str, message: &str) -> AppResult<T> {
        self.map_err(|e| {
            tracing::error!("{}: {}", context, e);
            AppError::Internal(message.to_string())
        })
    }

    fn log_as(self, context: &str, error: AppError) -> AppResult<T> {
        self.map_err(|e| {
            tracing::warn!("{}: {}", context, e);
            error
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::RecordingState;

    #[test]
    fn statuses_follow_the_error_kind() {
        assert_eq!(AppError::StorageUnavailable.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(AppError::StorageUnavailable.to_string(), "Object storage not configured");
        assert_eq!(
            AppError::Storage(StorageError::NotFound("/b/x".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::Recording(RecordingError::InvalidTransition {
                from: RecordingState::Stopped,
                action: "start",
            })
            .status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::Recording(CaptureError::PermissionDenied("screen".into()).into()).code(),
            "PERMISSION_DENIED"
        );
    }

    #[test]
    fn log_500_hides_the_cause() {
        let failed: Result<(), String> = Err("disk on fire".to_string());
        let error = failed.log_500("Saving video", "Failed to save video").unwrap_err();
        assert_eq!(error.to_string(), "Failed to save video");
        assert_eq!(ErrorResponse::from(&error).code, "INTERNAL_ERROR");
    }
}
