//! Capture trait definitions
//!
//! Source-agnostic types and the traits every capture source implements.

use super::stream::{CaptureStream, MediaTrack};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors reported while acquiring capture streams
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Capture error: {0}")]
    Backend(String),
}

/// Result type for capture operations
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of pixels in a frame of this size
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Size in bytes of an RGBA8 frame of this size
    pub fn rgba_len(&self) -> usize {
        self.pixel_count() * 4
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Resolution requested for the camera when it feeds the picture-in-picture overlay
pub const OVERLAY_CAMERA_RESOLUTION: Resolution = Resolution::new(320, 240);

/// Selectable recording quality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    #[default]
    High,
    Medium,
    Low,
}

impl QualityTier {
    pub const ALL: [QualityTier; 3] = [QualityTier::High, QualityTier::Medium, QualityTier::Low];

    /// Capture resolution for this tier
    pub fn resolution(&self) -> Resolution {
        match self {
            QualityTier::High => Resolution::new(1920, 1080),
            QualityTier::Medium => Resolution::new(1280, 720),
            QualityTier::Low => Resolution::new(640, 480),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityTier::High => "high",
            QualityTier::Medium => "medium",
            QualityTier::Low => "low",
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QualityTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(QualityTier::High),
            "medium" => Ok(QualityTier::Medium),
            "low" => Ok(QualityTier::Low),
            other => Err(format!("unknown quality tier: {other}")),
        }
    }
}

/// Information about a camera/webcam
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraInfo {
    /// Unique device ID
    pub id: String,

    /// Human-readable label, may be empty
    pub label: String,
}

impl CameraInfo {
    /// Label to show, falling back to a short form of the id
    pub fn display_label(&self) -> String {
        if self.label.is_empty() {
            let short: String = self.id.chars().take(8).collect();
            format!("Camera {short}")
        } else {
            self.label.clone()
        }
    }
}

/// What a capture stream carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    /// Screen, window or tab
    Display,
    /// Webcam
    Camera,
    /// Derived from other streams by the compositor
    Composite,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Display => write!(f, "display"),
            StreamKind::Camera => write!(f, "camera"),
            StreamKind::Composite => write!(f, "composite"),
        }
    }
}

/// Request for a display capture stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayConstraints {
    pub resolution: Resolution,
    pub audio: bool,
}

/// Request for a camera capture stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraConstraints {
    /// Device to open (None = first available)
    pub device_id: Option<String>,

    /// Requested frame size (None = the device's native size)
    pub resolution: Option<Resolution>,

    pub audio: bool,
}

/// Which audio an audio track should carry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioInput {
    /// What the machine is playing (loopback)
    System,
    /// The default microphone
    Microphone,
}

impl fmt::Display for AudioInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioInput::System => write!(f, "system audio"),
            AudioInput::Microphone => write!(f, "microphone"),
        }
    }
}

/// A source of audio tracks
#[async_trait]
pub trait AudioSource: Send + Sync {
    /// Open a live audio track for the input
    async fn open_audio(&self, input: AudioInput) -> CaptureResult<MediaTrack>;
}

/// A source of display capture streams
#[async_trait]
pub trait DisplaySource: Send + Sync {
    /// Open a display stream honoring the constraints
    async fn open_display(&self, constraints: &DisplayConstraints) -> CaptureResult<CaptureStream>;
}

/// A source of camera capture streams
#[async_trait]
pub trait CameraSource: Send + Sync {
    /// List the cameras that can be opened
    async fn list_cameras(&self) -> CaptureResult<Vec<CameraInfo>>;

    /// Open a camera stream honoring the constraints
    async fn open_camera(&self, constraints: &CameraConstraints) -> CaptureResult<CaptureStream>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_tiers_map_to_documented_resolutions() {
        let sizes: Vec<(u32, u32)> = QualityTier::ALL
            .iter()
            .map(|tier| {
                let r = tier.resolution();
                (r.width, r.height)
            })
            .collect();

        assert_eq!(sizes, vec![(1920, 1080), (1280, 720), (640, 480)]);
    }

    #[test]
    fn quality_tier_parses_wire_names() {
        for tier in QualityTier::ALL {
            assert_eq!(tier.as_str().parse::<QualityTier>().unwrap(), tier);
        }
        assert!("standard".parse::<QualityTier>().is_err());
    }

    #[test]
    fn unlabeled_camera_gets_short_id_label() {
        let camera = CameraInfo {
            id: "0123456789abcdef".to_string(),
            label: String::new(),
        };
        assert_eq!(camera.display_label(), "Camera 01234567");
    }

    #[test]
    fn quality_tier_serializes_lowercase() {
        let json = serde_json::to_string(&QualityTier::Medium).unwrap();
        assert_eq!(json, "\"medium\"");
    }
}
