//! Native screen capture using xcap
//!
//! The primary monitor is grabbed on a dedicated capture thread, scaled to
//! the requested resolution and published to the stream's video track until
//! the track is stopped. System audio comes from the configured
//! [`AudioSource`] when one is set.

use super::stream::{CaptureStream, FramePublisher, MediaTrack, VideoFrame};
use super::traits::{
    AudioInput, AudioSource, CaptureError, CaptureResult, DisplayConstraints, DisplaySource,
    Resolution, StreamKind,
};
use crate::compositor::fit_frame;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use xcap::Monitor;

/// Rate at which the monitor is grabbed
pub const SCREEN_FPS: u32 = 30;

/// Display source backed by the platform screen capture API
#[derive(Clone, Default)]
pub struct NativeDisplay {
    audio: Option<Arc<dyn AudioSource>>,
}

impl NativeDisplay {
    pub fn new() -> Self {
        Self { audio: None }
    }

    /// Attach system audio from `audio` to display streams that ask for it
    pub fn with_audio(mut self, audio: Arc<dyn AudioSource>) -> Self {
        self.audio = Some(audio);
        self
    }
}

fn grab(monitor: &Monitor, target: Resolution, started: Instant) -> CaptureResult<VideoFrame> {
    let image = monitor
        .capture_image()
        .map_err(|e| CaptureError::Backend(format!("Failed to capture screen: {e}")))?;
    let (width, height) = (image.width(), image.height());
    let ts = started.elapsed().as_secs_f64() * 1000.0;
    let frame = VideoFrame::new(width, height, image.into_raw(), ts)
        .ok_or_else(|| CaptureError::Backend("Unexpected screen buffer size".to_string()))?;
    Ok(fit_frame(frame, target))
}

/// Grab the primary monitor until the track is stopped
fn run_capture(
    target: Resolution,
    publisher: FramePublisher,
    opened: oneshot::Sender<CaptureResult<()>>,
) {
    let monitor = match Monitor::all() {
        Ok(monitors) => monitors.into_iter().next(),
        Err(e) => {
            let _ = opened.send(Err(CaptureError::DeviceUnavailable(format!(
                "Failed to list monitors: {e}"
            ))));
            return;
        }
    };
    let Some(monitor) = monitor else {
        let _ = opened.send(Err(CaptureError::DeviceUnavailable(
            "No capturable surface".to_string(),
        )));
        return;
    };

    let started = Instant::now();

    // The first grab is where a missing screen recording grant shows up
    match grab(&monitor, target, started) {
        Ok(frame) => {
            publisher.publish(frame);
        }
        Err(e) => {
            let _ = opened.send(Err(CaptureError::PermissionDenied(e.to_string())));
            return;
        }
    }
    if opened.send(Ok(())).is_err() {
        return;
    }

    let period = Duration::from_secs_f64(1.0 / SCREEN_FPS as f64);
    let mut next = Instant::now() + period;
    let mut frame_count: u64 = 1;

    while !publisher.is_stopped() {
        let now = Instant::now();
        if now < next {
            std::thread::sleep(next - now);
        }
        // Skip ticks we were too slow for
        next = next.max(Instant::now()) + period;

        match grab(&monitor, target, started) {
            Ok(frame) => {
                if !publisher.publish(frame) {
                    break;
                }
                frame_count += 1;
            }
            Err(e) => tracing::debug!("Failed to capture screen frame: {}", e),
        }
    }

    tracing::info!(
        "Screen captured {} frames in {:.2}s",
        frame_count,
        started.elapsed().as_secs_f64()
    );
}

#[async_trait]
impl DisplaySource for NativeDisplay {
    async fn open_display(&self, constraints: &DisplayConstraints) -> CaptureResult<CaptureStream> {
        let target = constraints.resolution;
        let (video, publisher) = MediaTrack::video("Screen");
        let (opened_tx, opened_rx) = oneshot::channel();

        std::thread::Builder::new()
            .name("screen-capture".to_string())
            .spawn(move || run_capture(target, publisher, opened_tx))
            .map_err(|e| CaptureError::Backend(format!("Failed to spawn capture thread: {e}")))?;

        match opened_rx.await {
            Ok(result) => result?,
            Err(_) => {
                return Err(CaptureError::Backend(
                    "Capture thread exited before grabbing the screen".to_string(),
                ))
            }
        }
        tracing::info!("Screen capture started at {}", target);

        let mut stream = CaptureStream::new(StreamKind::Display, target).with_track(video);
        if let (true, Some(audio)) = (constraints.audio, &self.audio) {
            match audio.open_audio(AudioInput::System).await {
                Ok(track) => stream.add_track(track),
                Err(e) => tracing::warn!("Recording without system audio: {}", e),
            }
        }
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore = "needs a display and screen recording permission"]
    async fn grabs_the_primary_monitor() {
        let stream = NativeDisplay::new()
            .open_display(&DisplayConstraints {
                resolution: Resolution::new(640, 480),
                audio: false,
            })
            .await
            .unwrap();
        let track = stream.video_track().unwrap().clone();

        let frame = track.latest_frame().expect("first grab is published");
        assert_eq!(frame.resolution(), Resolution::new(640, 480));
        stream.stop_all();
    }
}
