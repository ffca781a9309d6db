//! Native webcam capture using nokhwa
//!
//! Each opened camera runs on its own capture thread. Frames are decoded to
//! RGBA and published to the stream's video track until the track is stopped.
//! The microphone comes from the configured [`AudioSource`] when one is set.

use super::stream::{CaptureStream, FramePublisher, MediaTrack, VideoFrame};
use super::traits::{
    AudioInput, AudioSource, CameraConstraints, CameraInfo, CameraSource, CaptureError,
    CaptureResult, Resolution, StreamKind,
};
use async_trait::async_trait;
use std::sync::Arc;
use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{ApiBackend, CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;
use tokio::sync::oneshot;

/// Camera source backed by the platform camera API
#[derive(Clone, Default)]
pub struct NativeCamera {
    audio: Option<Arc<dyn AudioSource>>,
}

impl NativeCamera {
    pub fn new() -> Self {
        Self { audio: None }
    }

    /// Attach the microphone from `audio` to camera streams that ask for it
    pub fn with_audio(mut self, audio: Arc<dyn AudioSource>) -> Self {
        self.audio = Some(audio);
        self
    }

    fn camera_index(device_id: Option<&str>) -> CameraIndex {
        match device_id {
            Some(id) => match id.parse::<u32>() {
                Ok(idx) => CameraIndex::Index(idx),
                Err(_) => CameraIndex::String(id.to_string()),
            },
            None => CameraIndex::Index(0),
        }
    }
}

/// Enumerate cameras known to the platform backend
fn query_cameras() -> CaptureResult<Vec<CameraInfo>> {
    let cameras = nokhwa::query(ApiBackend::Auto)
        .map_err(|e| CaptureError::Backend(format!("Failed to enumerate cameras: {e}")))?;

    Ok(cameras
        .into_iter()
        .map(|info| {
            let id = match info.index() {
                CameraIndex::Index(i) => i.to_string(),
                CameraIndex::String(s) => s.to_string(),
            };
            CameraInfo {
                id,
                label: info.human_name().to_string(),
            }
        })
        .collect())
}

/// Open the camera and pump decoded frames until the track is stopped
fn run_capture(
    index: CameraIndex,
    requested: Option<Resolution>,
    publisher: FramePublisher,
    opened: oneshot::Sender<CaptureResult<Resolution>>,
) {
    let format = match requested {
        Some(r) => RequestedFormat::new::<RgbAFormat>(RequestedFormatType::HighestResolution(
            nokhwa::utils::Resolution::new(r.width, r.height),
        )),
        None => RequestedFormat::new::<RgbAFormat>(RequestedFormatType::AbsoluteHighestResolution),
    };

    let mut camera = match Camera::new(index.clone(), format) {
        Ok(c) => c,
        Err(e) => {
            let _ = opened.send(Err(CaptureError::DeviceUnavailable(format!(
                "Failed to open camera {index:?}: {e}"
            ))));
            return;
        }
    };

    if let Err(e) = camera.open_stream() {
        let _ = opened.send(Err(CaptureError::PermissionDenied(format!(
            "Failed to open camera stream: {e}"
        ))));
        return;
    }

    let camera_format = camera.camera_format();
    let actual = Resolution::new(
        camera_format.resolution().width(),
        camera_format.resolution().height(),
    );
    tracing::info!(
        "Webcam opened: {} @ {}fps, format={:?}",
        actual,
        camera_format.frame_rate(),
        camera_format.format()
    );

    if opened.send(Ok(actual)).is_err() {
        let _ = camera.stop_stream();
        return;
    }

    let capture_start = std::time::Instant::now();
    let mut frame_count: u64 = 0;

    while !publisher.is_stopped() {
        // Blocks until the camera delivers the next frame
        let decoded = camera
            .frame()
            .and_then(|buffer| buffer.decode_image::<RgbAFormat>());

        match decoded {
            Ok(image) => {
                let (width, height) = image.dimensions();
                let ts = capture_start.elapsed().as_secs_f64() * 1000.0;
                if let Some(frame) = VideoFrame::new(width, height, image.into_raw(), ts) {
                    if !publisher.publish(frame) {
                        break;
                    }
                    frame_count += 1;
                }
            }
            Err(e) => {
                tracing::debug!("Failed to capture frame: {:?}", e);
            }
        }
    }

    tracing::info!(
        "Webcam captured {} frames in {:.2}s",
        frame_count,
        capture_start.elapsed().as_secs_f64()
    );

    if let Err(e) = camera.stop_stream() {
        tracing::warn!("Error stopping camera stream: {:?}", e);
    }
}

#[async_trait]
impl CameraSource for NativeCamera {
    async fn list_cameras(&self) -> CaptureResult<Vec<CameraInfo>> {
        tokio::task::spawn_blocking(query_cameras)
            .await
            .map_err(|e| CaptureError::Backend(e.to_string()))?
    }

    async fn open_camera(&self, constraints: &CameraConstraints) -> CaptureResult<CaptureStream> {
        let index = Self::camera_index(constraints.device_id.as_deref());
        let label = constraints
            .device_id
            .clone()
            .unwrap_or_else(|| "Default camera".to_string());

        let (video, publisher) = MediaTrack::video(label);
        let (opened_tx, opened_rx) = oneshot::channel();
        let requested = constraints.resolution;

        std::thread::Builder::new()
            .name("webcam-capture".to_string())
            .spawn(move || run_capture(index, requested, publisher, opened_tx))
            .map_err(|e| CaptureError::Backend(format!("Failed to spawn capture thread: {e}")))?;

        let resolution = match opened_rx.await {
            Ok(result) => result?,
            Err(_) => {
                return Err(CaptureError::Backend(
                    "Capture thread exited before opening the camera".to_string(),
                ))
            }
        };

        let mut stream = CaptureStream::new(StreamKind::Camera, resolution).with_track(video);
        if let (true, Some(audio)) = (constraints.audio, &self.audio) {
            match audio.open_audio(AudioInput::Microphone).await {
                Ok(track) => stream.add_track(track),
                Err(e) => tracing::warn!("Recording without microphone: {}", e),
            }
        }
        Ok(stream)
    }
}
