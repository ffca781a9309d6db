//! Recording error types

use super::state::RecordingState;
use crate::capture::CaptureError;
use crate::upload::UploadError;
use thiserror::Error;

/// Errors raised by the recording controller and encoders
#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("Not recording")]
    NotRecording,

    #[error("Cannot {action} while {from}")]
    InvalidTransition {
        from: RecordingState,
        action: &'static str,
    },

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Upload failed: {0}")]
    Upload(#[from] UploadError),
}

/// Result type for recording operations
pub type RecordingResult<T> = Result<T, RecordingError>;
