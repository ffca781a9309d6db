//! Aggregate statistics over the video store

use super::schema::{VideoQuality, VideoRecord, VideoType};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeCounts {
    pub screen: u64,
    pub webcam: u64,
    pub combined: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityCounts {
    pub high: u64,
    pub medium: u64,
    pub low: u64,
    pub standard: u64,
}

/// Totals computed by a full scan of the store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analytics {
    pub total_videos: u64,
    pub total_views: u64,
    /// Sum of durations in seconds
    pub total_duration: u64,
    pub by_type: TypeCounts,
    pub by_quality: QualityCounts,
}

impl Analytics {
    pub fn from_records(records: &[VideoRecord]) -> Self {
        records.iter().fold(Self::default(), |mut acc, record| {
            acc.total_videos += 1;
            acc.total_views += record.views;
            acc.total_duration += record.duration;

            match record.kind {
                VideoType::Screen => acc.by_type.screen += 1,
                VideoType::Webcam => acc.by_type.webcam += 1,
                VideoType::Combined => acc.by_type.combined += 1,
            }
            match record.quality {
                VideoQuality::High => acc.by_quality.high += 1,
                VideoQuality::Medium => acc.by_quality.medium += 1,
                VideoQuality::Low => acc.by_quality.low += 1,
                VideoQuality::Standard => acc.by_quality.standard += 1,
            }
            acc
        })
    }
}
