//! Capture session lifecycle
//!
//! A [`MediaCaptureSession`] acquires the streams one recording needs and is
//! their only owner. `release()` tears all of them down and is safe to call
//! any number of times; dropping the session releases as well.

use super::stream::CaptureStream;
use super::traits::{
    CameraConstraints, CameraInfo, CameraSource, CaptureResult, DisplayConstraints, DisplaySource,
    QualityTier, OVERLAY_CAMERA_RESOLUTION,
};
use std::sync::Arc;

/// The display and camera sources sessions acquire from
#[derive(Clone)]
pub struct CaptureSources {
    pub display: Arc<dyn DisplaySource>,
    pub camera: Arc<dyn CameraSource>,
}

impl CaptureSources {
    pub fn new(display: Arc<dyn DisplaySource>, camera: Arc<dyn CameraSource>) -> Self {
        Self { display, camera }
    }
}

/// Display acquisition settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayConfig {
    pub quality: QualityTier,
    pub audio: bool,
}

impl DisplayConfig {
    pub fn new(quality: QualityTier) -> Self {
        Self {
            quality,
            audio: true,
        }
    }
}

/// What a camera stream will be used for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraRole {
    /// Picture-in-picture overlay in combined mode (fixed low preview size)
    Overlay,
    /// The whole recording in webcam mode (device native size)
    Primary,
}

/// Camera acquisition settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraConfig {
    pub role: CameraRole,
    pub audio: bool,
}

/// Owns every stream acquired for one recording
pub struct MediaCaptureSession {
    sources: CaptureSources,
    streams: Vec<CaptureStream>,
}

impl MediaCaptureSession {
    pub fn new(sources: CaptureSources) -> Self {
        Self {
            sources,
            streams: Vec::new(),
        }
    }

    /// Acquire a display stream at the resolution of the configured quality tier
    pub async fn acquire_display(&mut self, config: &DisplayConfig) -> CaptureResult<CaptureStream> {
        let constraints = DisplayConstraints {
            resolution: config.quality.resolution(),
            audio: config.audio,
        };

        tracing::debug!(
            "Requesting display capture at {} (audio={})",
            constraints.resolution,
            constraints.audio
        );

        let stream = self.sources.display.open_display(&constraints).await?;
        tracing::info!("Display stream {} acquired at {}", stream.id(), stream.resolution());
        self.streams.push(stream.clone());
        Ok(stream)
    }

    /// Acquire a camera stream sized for its role
    pub async fn acquire_camera(
        &mut self,
        device_id: Option<&str>,
        config: &CameraConfig,
    ) -> CaptureResult<CaptureStream> {
        let constraints = CameraConstraints {
            device_id: device_id.map(str::to_string),
            resolution: match config.role {
                CameraRole::Overlay => Some(OVERLAY_CAMERA_RESOLUTION),
                CameraRole::Primary => None,
            },
            audio: config.audio,
        };

        tracing::debug!("Requesting camera capture: {:?}", constraints);

        let stream = self.sources.camera.open_camera(&constraints).await?;
        tracing::info!("Camera stream {} acquired at {}", stream.id(), stream.resolution());
        self.streams.push(stream.clone());
        Ok(stream)
    }

    /// List available cameras. Failures degrade to an empty list.
    pub async fn enumerate_cameras(&self) -> Vec<CameraInfo> {
        match self.sources.camera.list_cameras().await {
            Ok(cameras) => cameras,
            Err(e) => {
                tracing::warn!("Failed to enumerate cameras: {}", e);
                Vec::new()
            }
        }
    }

    pub fn streams(&self) -> &[CaptureStream] {
        &self.streams
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Stop every track of every acquired stream. Returns the number of
    /// tracks this call ended; a second call returns 0.
    pub fn release(&mut self) -> usize {
        let stopped: usize = self.streams.iter().map(CaptureStream::stop_all).sum();
        if !self.streams.is_empty() {
            tracing::debug!(
                "Released {} capture stream(s), {} track(s) stopped",
                self.streams.len(),
                stopped
            );
        }
        self.streams.clear();
        stopped
    }
}

impl Drop for MediaCaptureSession {
    fn drop(&mut self) {
        self.release();
    }
}
