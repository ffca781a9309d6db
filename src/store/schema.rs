//! Video metadata schema
//!
//! These types define the on-disk `videos.json` layout and the JSON the HTTP
//! surface returns. Field names are camelCase on the wire.

use crate::capture::QualityTier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Enumerations
// =============================================================================

/// Recording mode a video was captured in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoType {
    #[default]
    Screen,
    Webcam,
    Combined,
}

impl VideoType {
    pub const ALL: [VideoType; 3] = [VideoType::Screen, VideoType::Webcam, VideoType::Combined];

    pub fn as_str(&self) -> &'static str {
        match self {
            VideoType::Screen => "screen",
            VideoType::Webcam => "webcam",
            VideoType::Combined => "combined",
        }
    }
}

impl fmt::Display for VideoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VideoType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "screen" => Ok(VideoType::Screen),
            "webcam" => Ok(VideoType::Webcam),
            "combined" => Ok(VideoType::Combined),
            other => Err(format!("unknown video type: {other}")),
        }
    }
}

/// Quality label stored with a video. Webcam recordings are always `standard`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoQuality {
    High,
    Medium,
    Low,
    Standard,
}

impl VideoQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoQuality::High => "high",
            VideoQuality::Medium => "medium",
            VideoQuality::Low => "low",
            VideoQuality::Standard => "standard",
        }
    }
}

impl From<QualityTier> for VideoQuality {
    fn from(tier: QualityTier) -> Self {
        match tier {
            QualityTier::High => VideoQuality::High,
            QualityTier::Medium => VideoQuality::Medium,
            QualityTier::Low => VideoQuality::Low,
        }
    }
}

impl fmt::Display for VideoQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Records
// =============================================================================

/// One uploaded video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoRecord {
    /// Unix milliseconds at creation, as a string
    pub id: String,

    /// Public path the object server serves the video under (`/objects/...`)
    pub video_path: String,

    /// Length in seconds
    pub duration: u64,

    #[serde(rename = "type")]
    pub kind: VideoType,

    pub quality: VideoQuality,

    #[serde(default)]
    pub views: u64,

    pub created_at: DateTime<Utc>,
}

/// The whole store file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoCollection {
    #[serde(default)]
    pub videos: Vec<VideoRecord>,
}

/// Request body registering an uploaded video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewVideo {
    /// Storage URL the artifact was written to (query string is ignored)
    #[serde(rename = "videoURL")]
    pub video_url: String,

    pub duration: u64,

    #[serde(rename = "type")]
    pub kind: VideoType,

    pub quality: VideoQuality,
}
