//! Synthetic capture sources
//!
//! Deterministic generated streams used for headless runs and tests. Frames
//! are a solid base color with a bar sweeping across the middle third, so
//! the corners of every frame keep the base color. Audio is a quiet sine
//! tone whose sample count follows the wall clock.

use super::stream::{AudioFormat, AudioPublisher, CaptureStream, FramePublisher, MediaTrack, VideoFrame};
use super::traits::{
    AudioInput, AudioSource, CameraConstraints, CameraInfo, CameraSource, CaptureError,
    CaptureResult, DisplayConstraints, DisplaySource, Resolution, StreamKind,
};
use async_trait::async_trait;
use std::f32::consts::TAU;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};

/// Default frame rate of synthetic producers
pub const SYNTHETIC_FPS: u32 = 30;

const BAR_WIDTH: u32 = 16;
const BAR_STEP: u32 = 8;

/// Render one synthetic frame
pub fn render_pattern(resolution: Resolution, base: [u8; 4], index: u64, timestamp_ms: f64) -> VideoFrame {
    let mut frame = VideoFrame::solid(resolution, base, timestamp_ms);
    let Resolution { width, height } = resolution;
    if width == 0 || height == 0 {
        return frame;
    }

    let bar_x = ((index * BAR_STEP as u64) % width as u64) as u32;
    let bar = [255 - base[0], 255 - base[1], 255 - base[2], 255];
    let data = std::sync::Arc::make_mut(&mut frame.data);
    for y in height / 3..(height * 2) / 3 {
        for x in bar_x..(bar_x + BAR_WIDTH).min(width) {
            let idx = ((y * width + x) * 4) as usize;
            data[idx..idx + 4].copy_from_slice(&bar);
        }
    }
    frame
}

/// Drive a publisher with generated frames until its track is stopped
fn spawn_producer(publisher: FramePublisher, resolution: Resolution, base: [u8; 4], fps: u32) {
    tokio::spawn(async move {
        let period = Duration::from_secs_f64(1.0 / fps.max(1) as f64);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let started = Instant::now();
        let mut index = 0u64;

        loop {
            tokio::select! {
                biased;
                _ = publisher.stopped() => break,
                _ = ticker.tick() => {
                    let ts = started.elapsed().as_secs_f64() * 1000.0;
                    if !publisher.publish(render_pattern(resolution, base, index, ts)) {
                        break;
                    }
                    index += 1;
                }
            }
        }

        tracing::debug!("Synthetic producer stopped after {} frames", index);
    });
}

const AUDIO_PERIOD: Duration = Duration::from_millis(20);
const TONE_AMPLITUDE: f32 = 0.1;

/// Drive an audio publisher with a sine tone until its track is stopped
fn spawn_tone(publisher: AudioPublisher, tone_hz: f32) {
    tokio::spawn(async move {
        let format = publisher.format();
        let AudioFormat { sample_rate, channels } = format;
        let mut ticker = tokio::time::interval(AUDIO_PERIOD);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let started = Instant::now();
        let mut produced = 0u64;

        loop {
            tokio::select! {
                biased;
                _ = publisher.stopped() => break,
                _ = ticker.tick() => {
                    let due = format.frames_for(started.elapsed());
                    let mut samples = Vec::with_capacity((due - produced) as usize * channels as usize);
                    while produced < due {
                        let t = produced as f32 / sample_rate.max(1) as f32;
                        let value = (TAU * tone_hz * t).sin() * TONE_AMPLITUDE;
                        samples.extend(std::iter::repeat(value).take(channels as usize));
                        produced += 1;
                    }
                    if !samples.is_empty() && !publisher.publish(samples) {
                        break;
                    }
                }
            }
        }

        tracing::debug!("Synthetic tone stopped after {} samples", produced);
    });
}

/// Generated audio: a different tone per input
#[derive(Debug, Clone, Copy)]
pub struct SyntheticAudio {
    format: AudioFormat,
}

impl SyntheticAudio {
    pub fn new(format: AudioFormat) -> Self {
        Self { format }
    }

    fn tone_hz(input: AudioInput) -> f32 {
        match input {
            AudioInput::System => 440.0,
            AudioInput::Microphone => 220.0,
        }
    }
}

impl Default for SyntheticAudio {
    fn default() -> Self {
        Self::new(AudioFormat::default())
    }
}

#[async_trait]
impl AudioSource for SyntheticAudio {
    async fn open_audio(&self, input: AudioInput) -> CaptureResult<MediaTrack> {
        let (track, publisher) = MediaTrack::audio(format!("Synthetic {input}"), self.format);
        spawn_tone(publisher, Self::tone_hz(input));
        Ok(track)
    }
}

/// Generated display capture
#[derive(Debug, Clone)]
pub struct SyntheticDisplay {
    color: [u8; 4],
    fps: u32,
    permission_granted: bool,
    surface_available: bool,
}

impl SyntheticDisplay {
    pub fn new() -> Self {
        Self {
            color: [24, 24, 27, 255],
            fps: SYNTHETIC_FPS,
            permission_granted: true,
            surface_available: true,
        }
    }

    pub fn with_color(mut self, color: [u8; 4]) -> Self {
        self.color = color;
        self
    }

    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps;
        self
    }

    /// Behave as if the user declined the capture prompt
    pub fn deny_permission(mut self) -> Self {
        self.permission_granted = false;
        self
    }

    /// Behave as if there is nothing to capture
    pub fn without_surface(mut self) -> Self {
        self.surface_available = false;
        self
    }
}

impl Default for SyntheticDisplay {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DisplaySource for SyntheticDisplay {
    async fn open_display(&self, constraints: &DisplayConstraints) -> CaptureResult<CaptureStream> {
        if !self.permission_granted {
            return Err(CaptureError::PermissionDenied(
                "Display capture was declined".to_string(),
            ));
        }
        if !self.surface_available {
            return Err(CaptureError::DeviceUnavailable(
                "No capturable surface".to_string(),
            ));
        }

        let (video, publisher) = MediaTrack::video("Synthetic display");
        let mut stream = CaptureStream::new(StreamKind::Display, constraints.resolution).with_track(video);
        if constraints.audio {
            stream.add_track(SyntheticAudio::default().open_audio(AudioInput::System).await?);
        }

        spawn_producer(publisher, constraints.resolution, self.color, self.fps);
        Ok(stream)
    }
}

/// Generated camera devices
#[derive(Debug, Clone)]
pub struct SyntheticCamera {
    devices: Vec<CameraInfo>,
    native_resolution: Resolution,
    color: [u8; 4],
    fps: u32,
    permission_granted: bool,
}

impl SyntheticCamera {
    pub fn new(devices: Vec<CameraInfo>) -> Self {
        Self {
            devices,
            native_resolution: Resolution::new(1280, 720),
            color: [59, 130, 246, 255],
            fps: SYNTHETIC_FPS,
            permission_granted: true,
        }
    }

    pub fn with_native_resolution(mut self, resolution: Resolution) -> Self {
        self.native_resolution = resolution;
        self
    }

    pub fn with_color(mut self, color: [u8; 4]) -> Self {
        self.color = color;
        self
    }

    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps;
        self
    }

    pub fn deny_permission(mut self) -> Self {
        self.permission_granted = false;
        self
    }
}

impl Default for SyntheticCamera {
    /// One camera with an empty label
    fn default() -> Self {
        Self::new(vec![CameraInfo {
            id: "synthetic-0".to_string(),
            label: String::new(),
        }])
    }
}

#[async_trait]
impl CameraSource for SyntheticCamera {
    async fn list_cameras(&self) -> CaptureResult<Vec<CameraInfo>> {
        Ok(self.devices.clone())
    }

    async fn open_camera(&self, constraints: &CameraConstraints) -> CaptureResult<CaptureStream> {
        if !self.permission_granted {
            return Err(CaptureError::PermissionDenied(
                "Camera access was declined".to_string(),
            ));
        }

        let device = match &constraints.device_id {
            Some(id) => self.devices.iter().find(|d| &d.id == id),
            None => self.devices.first(),
        }
        .ok_or_else(|| CaptureError::DeviceUnavailable("No camera found".to_string()))?;

        let resolution = constraints.resolution.unwrap_or(self.native_resolution);
        let label = if device.label.is_empty() {
            device.id.clone()
        } else {
            device.label.clone()
        };

        let (video, publisher) = MediaTrack::video(label);
        let mut stream = CaptureStream::new(StreamKind::Camera, resolution).with_track(video);
        if constraints.audio {
            stream.add_track(SyntheticAudio::default().open_audio(AudioInput::Microphone).await?);
        }

        spawn_producer(publisher, resolution, self.color, self.fps);
        Ok(stream)
    }
}
