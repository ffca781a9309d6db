//! Recording state management
//!
//! Defines the recording state machine, the finished artifact and the events
//! the controller broadcasts.

use crate::storage::{extension_for, DEFAULT_EXTENSION};
use crate::store::{VideoQuality, VideoType};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Current state of the recording system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    /// No recording in progress
    #[default]
    Idle,
    /// Currently recording
    Recording,
    /// Recording finished, artifact ready
    Stopped,
}

impl fmt::Display for RecordingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordingState::Idle => write!(f, "idle"),
            RecordingState::Recording => write!(f, "recording"),
            RecordingState::Stopped => write!(f, "stopped"),
        }
    }
}

/// What is being recorded and the quality label it will be stored with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingOptions {
    pub mode: VideoType,
    pub quality: VideoQuality,
}

/// A finished recording
#[derive(Debug, Clone)]
pub struct Artifact {
    /// Concatenated encoder output
    pub bytes: Bytes,

    /// Container/codec tag of `bytes`
    pub mime_type: String,

    /// Elapsed seconds when recording stopped
    pub duration_secs: u64,

    pub mode: VideoType,

    pub quality: VideoQuality,

    pub created_at: DateTime<Utc>,
}

impl Artifact {
    /// Suggested download name, e.g. `screen-recording-1700000000000.webm`.
    /// The extension follows the artifact's media type.
    pub fn file_name(&self) -> String {
        let ext = extension_for(&self.mime_type).unwrap_or(DEFAULT_EXTENSION);
        format!(
            "{}-recording-{}.{}",
            self.mode,
            self.created_at.timestamp_millis(),
            ext
        )
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Summary of an artifact for status responses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactInfo {
    pub file_name: String,
    pub mime_type: String,
    pub size: usize,
    pub duration: u64,
}

impl From<&Artifact> for ArtifactInfo {
    fn from(artifact: &Artifact) -> Self {
        Self {
            file_name: artifact.file_name(),
            mime_type: artifact.mime_type.clone(),
            size: artifact.len(),
            duration: artifact.duration_secs,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Error,
}

/// A user-facing notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub title: String,
    pub description: String,
    pub level: NoticeLevel,
}

impl Notice {
    pub fn info(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            level: NoticeLevel::Info,
        }
    }

    pub fn error(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            level: NoticeLevel::Error,
        }
    }
}

/// Events emitted during recording
#[derive(Debug, Clone, PartialEq)]
pub enum RecordingEvent {
    /// Recording started
    Started(RecordingOptions),
    /// One more second elapsed
    Tick(u64),
    /// Recording stopped and the artifact is ready
    Stopped { duration_secs: u64, size: usize },
    /// Artifact dropped, back to idle
    Discarded,
    /// Something the user should be told about
    Notice(Notice),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn artifact_file_name_uses_mode_and_time() {
        let artifact = Artifact {
            bytes: Bytes::from_static(b"data"),
            mime_type: "video/webm".to_string(),
            duration_secs: 3,
            mode: VideoType::Combined,
            quality: VideoQuality::High,
            created_at: Utc.timestamp_millis_opt(1_700_000_000_123).unwrap(),
        };
        assert_eq!(artifact.file_name(), "combined-recording-1700000000123.webm");
        assert_eq!(ArtifactInfo::from(&artifact).size, 4);

        let frame_log = Artifact {
            mime_type: "application/x-frame-log".to_string(),
            ..artifact
        };
        assert_eq!(frame_log.file_name(), "combined-recording-1700000000123.framelog");
    }

    #[test]
    fn state_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&RecordingState::Stopped).unwrap(), "\"stopped\"");
        assert_eq!(RecordingState::default(), RecordingState::Idle);
    }
}
