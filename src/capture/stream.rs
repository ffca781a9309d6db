//! Live media streams
//!
//! A [`CaptureStream`] is an owned record of the tracks one acquisition
//! produced. Video tracks publish their most recent frame through a watch
//! channel; audio tracks broadcast interleaved PCM chunks. Stopping a track
//! cancels its producer and hides anything it published, so a released
//! source can never be read again.

use super::traits::{Resolution, StreamKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

/// A single RGBA8 video frame
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Frame width in pixels
    pub width: u32,

    /// Frame height in pixels
    pub height: u32,

    /// Tightly packed RGBA pixel data
    pub data: Arc<Vec<u8>>,

    /// Milliseconds since the producing track started
    pub timestamp_ms: f64,
}

impl VideoFrame {
    /// Wrap RGBA data, returning None if the buffer does not match the size
    pub fn new(width: u32, height: u32, data: Vec<u8>, timestamp_ms: f64) -> Option<Self> {
        if data.len() != Resolution::new(width, height).rgba_len() {
            return None;
        }
        Some(Self {
            width,
            height,
            data: Arc::new(data),
            timestamp_ms,
        })
    }

    /// A frame filled with one color
    pub fn solid(resolution: Resolution, rgba: [u8; 4], timestamp_ms: f64) -> Self {
        let data = rgba
            .iter()
            .copied()
            .cycle()
            .take(resolution.rgba_len())
            .collect::<Vec<u8>>();
        Self {
            width: resolution.width,
            height: resolution.height,
            data: Arc::new(data),
            timestamp_ms,
        }
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    /// RGBA value at (x, y), None when out of bounds
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = ((y * self.width + x) * 4) as usize;
        let px = self.data.get(idx..idx + 4)?;
        Some([px[0], px[1], px[2], px[3]])
    }
}

/// Chunks an audio track buffers for a slow reader before it lags
pub const AUDIO_BUFFER_CHUNKS: usize = 256;

/// Sample layout of an audio track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    pub const fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// Sample frames spanning `elapsed`, rounded to the nearest frame
    pub fn frames_for(&self, elapsed: Duration) -> u64 {
        (elapsed.as_secs_f64() * self.sample_rate as f64).round() as u64
    }
}

impl Default for AudioFormat {
    /// 48 kHz stereo
    fn default() -> Self {
        Self::new(48_000, 2)
    }
}

/// Interleaved f32 PCM samples
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub samples: Arc<Vec<f32>>,
    pub format: AudioFormat,
}

impl AudioChunk {
    /// Number of sample frames (one sample per channel)
    pub fn frames(&self) -> usize {
        self.samples.len() / self.format.channels.max(1) as usize
    }
}

/// Track media type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
}

#[derive(Debug)]
struct AudioFeed {
    format: AudioFormat,
    tx: broadcast::Sender<AudioChunk>,
}

#[derive(Debug)]
struct TrackInner {
    id: String,
    kind: TrackKind,
    label: String,
    stop: CancellationToken,
    frames: Option<watch::Receiver<Option<VideoFrame>>>,
    audio: Option<AudioFeed>,
}

/// Handle to one live track. Clones share the same underlying track.
#[derive(Debug, Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl MediaTrack {
    /// Create a video track and the publisher its producer writes frames to
    pub fn video(label: impl Into<String>) -> (Self, FramePublisher) {
        let (tx, rx) = watch::channel(None);
        let stop = CancellationToken::new();
        let track = Self {
            inner: Arc::new(TrackInner {
                id: Uuid::new_v4().to_string(),
                kind: TrackKind::Video,
                label: label.into(),
                stop: stop.clone(),
                frames: Some(rx),
                audio: None,
            }),
        };
        (track, FramePublisher { tx, stop })
    }

    /// Create an audio track and the publisher its producer writes samples to
    pub fn audio(label: impl Into<String>, format: AudioFormat) -> (Self, AudioPublisher) {
        let (tx, _) = broadcast::channel(AUDIO_BUFFER_CHUNKS);
        let stop = CancellationToken::new();
        let track = Self {
            inner: Arc::new(TrackInner {
                id: Uuid::new_v4().to_string(),
                kind: TrackKind::Audio,
                label: label.into(),
                stop: stop.clone(),
                frames: None,
                audio: Some(AudioFeed {
                    format,
                    tx: tx.clone(),
                }),
            }),
        };
        (track, AudioPublisher { tx, format, stop })
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn is_live(&self) -> bool {
        !self.inner.stop.is_cancelled()
    }

    /// Stop the track. Returns true if this call ended it.
    pub fn stop(&self) -> bool {
        if self.inner.stop.is_cancelled() {
            return false;
        }
        self.inner.stop.cancel();
        true
    }

    /// Most recent frame of a live video track
    pub fn latest_frame(&self) -> Option<VideoFrame> {
        if !self.is_live() {
            return None;
        }
        self.inner.frames.as_ref()?.borrow().clone()
    }

    /// Sample layout of an audio track
    pub fn audio_format(&self) -> Option<AudioFormat> {
        self.inner.audio.as_ref().map(|feed| feed.format)
    }

    /// Receive the samples a live audio track publishes from now on
    pub fn subscribe_audio(&self) -> Option<broadcast::Receiver<AudioChunk>> {
        if !self.is_live() {
            return None;
        }
        self.inner.audio.as_ref().map(|feed| feed.tx.subscribe())
    }

    /// Resolves once the track has been stopped
    pub fn stopped(&self) -> WaitForCancellationFuture<'_> {
        self.inner.stop.cancelled()
    }

    /// Whether two handles refer to the same track
    pub fn same_track(&self, other: &MediaTrack) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Producer side of a video track
#[derive(Debug)]
pub struct FramePublisher {
    tx: watch::Sender<Option<VideoFrame>>,
    stop: CancellationToken,
}

impl FramePublisher {
    /// Publish a frame. Returns false once the track has been stopped.
    pub fn publish(&self, frame: VideoFrame) -> bool {
        if self.stop.is_cancelled() {
            return false;
        }
        self.tx.send_replace(Some(frame));
        true
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Token cancelled when the track is stopped
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Resolves once the track has been stopped
    pub fn stopped(&self) -> WaitForCancellationFuture<'_> {
        self.stop.cancelled()
    }
}

/// Producer side of an audio track
#[derive(Debug, Clone)]
pub struct AudioPublisher {
    tx: broadcast::Sender<AudioChunk>,
    format: AudioFormat,
    stop: CancellationToken,
}

impl AudioPublisher {
    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Publish interleaved samples. Returns false once the track has been
    /// stopped. Samples nobody is subscribed to are dropped.
    pub fn publish(&self, samples: Vec<f32>) -> bool {
        if self.stop.is_cancelled() {
            return false;
        }
        let _ = self.tx.send(AudioChunk {
            samples: Arc::new(samples),
            format: self.format,
        });
        true
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Resolves once the track has been stopped
    pub fn stopped(&self) -> WaitForCancellationFuture<'_> {
        self.stop.cancelled()
    }
}

/// An acquired stream: kind, frame size and its tracks
#[derive(Debug, Clone)]
pub struct CaptureStream {
    id: String,
    kind: StreamKind,
    resolution: Resolution,
    tracks: Vec<MediaTrack>,
}

impl CaptureStream {
    pub fn new(kind: StreamKind, resolution: Resolution) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            resolution,
            tracks: Vec::new(),
        }
    }

    pub fn with_track(mut self, track: MediaTrack) -> Self {
        self.tracks.push(track);
        self
    }

    pub fn add_track(&mut self, track: MediaTrack) {
        self.tracks.push(track);
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    /// First video track, if any
    pub fn video_track(&self) -> Option<&MediaTrack> {
        self.tracks.iter().find(|t| t.kind() == TrackKind::Video)
    }

    pub fn audio_tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Audio)
    }

    /// True while at least one track is live
    pub fn is_active(&self) -> bool {
        self.tracks.iter().any(MediaTrack::is_live)
    }

    /// Stop every track. Returns how many tracks this call ended.
    pub fn stop_all(&self) -> usize {
        self.tracks.iter().filter(|t| t.stop()).count()
    }
}
