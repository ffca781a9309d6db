//! Picture-in-picture compositor
//!
//! Combines a primary (screen) stream and a secondary (webcam) stream into a
//! single derived stream. Every cycle draws the primary full-canvas, strokes
//! the accent border, then draws the secondary inside it.
//!
//! The render loop runs on its own thread, gated by a cancellation token.
//! Reading the source tracks and publishing the result each happen under a
//! short gate that first checks the token; drawing happens outside it.
//! [`CompositorHandle::cancel`] waits on that gate, so once `cancel` returns
//! no further frame is read from the source tracks or published.

pub mod canvas;
pub mod layout;

pub use canvas::{fit_frame, Canvas};
pub use layout::{PipLayout, Rect, ACCENT_COLOR, BORDER_WIDTH, PIP_MARGIN, PIP_SCALE_PERCENT};

use crate::capture::{CaptureStream, FramePublisher, MediaTrack, Resolution, StreamKind, VideoFrame};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Rate at which the composite stream is captured
pub const COMPOSITE_FPS: u32 = 30;

/// Draws composite frames onto a canvas of fixed size
#[derive(Debug, Clone)]
pub struct FrameCompositor {
    canvas: Canvas,
    layout: PipLayout,
}

impl FrameCompositor {
    pub fn new(resolution: Resolution) -> Self {
        Self {
            canvas: Canvas::new(resolution),
            layout: PipLayout::for_canvas(resolution),
        }
    }

    pub fn layout(&self) -> &PipLayout {
        &self.layout
    }

    pub fn canvas(&self) -> &Canvas {
        &self.canvas
    }

    /// Run one draw cycle. A layer without a frame yet is skipped.
    pub fn draw(&mut self, primary: Option<&VideoFrame>, secondary: Option<&VideoFrame>) {
        let full = Rect::new(0, 0, self.layout.canvas.width, self.layout.canvas.height);
        if let Some(frame) = primary {
            self.canvas.draw_scaled(frame, full);
        }
        self.canvas
            .stroke_rect(self.layout.border, BORDER_WIDTH, ACCENT_COLOR);
        if let Some(frame) = secondary {
            self.canvas.draw_scaled(frame, self.layout.pip);
        }
    }

    pub fn snapshot(&self, timestamp_ms: f64) -> VideoFrame {
        self.canvas.snapshot(timestamp_ms)
    }

    /// Start the render loop over two source streams.
    ///
    /// Returns the handle controlling the loop and the composite stream: one
    /// video track fed by the loop plus the primary's audio tracks. Secondary
    /// audio is dropped.
    pub fn start(
        self,
        primary: &CaptureStream,
        secondary: &CaptureStream,
    ) -> (CompositorHandle, CaptureStream) {
        let resolution = self.canvas.resolution();
        let (video, publisher) = MediaTrack::video("Composite");

        let mut output = CaptureStream::new(StreamKind::Composite, resolution).with_track(video.clone());
        for audio in primary.audio_tracks() {
            output.add_track(audio.clone());
        }

        let token = CancellationToken::new();
        let gate = Arc::new(Mutex::new(()));
        let frames = Arc::new(AtomicU64::new(0));

        let render = RenderLoop {
            compositor: self,
            primary: primary.video_track().cloned(),
            secondary: secondary.video_track().cloned(),
            publisher,
            token: token.clone(),
            gate: gate.clone(),
            frames: frames.clone(),
        };
        if let Err(e) = std::thread::Builder::new()
            .name("compositor".to_string())
            .spawn(move || render.run())
        {
            tracing::error!("Failed to spawn compositor thread: {}", e);
        }

        tracing::info!("Compositor started at {} ({}fps)", resolution, COMPOSITE_FPS);

        let handle = CompositorHandle {
            token,
            gate,
            frames,
            output_track: video,
            cancelled: AtomicBool::new(false),
        };
        (handle, output)
    }
}

/// State owned by the render thread
struct RenderLoop {
    compositor: FrameCompositor,
    primary: Option<MediaTrack>,
    secondary: Option<MediaTrack>,
    publisher: FramePublisher,
    token: CancellationToken,
    gate: Arc<Mutex<()>>,
    frames: Arc<AtomicU64>,
}

impl RenderLoop {
    fn run(mut self) {
        let period = Duration::from_secs_f64(1.0 / COMPOSITE_FPS as f64);
        let started = Instant::now();
        let mut next = started;

        loop {
            let now = Instant::now();
            if now < next {
                std::thread::sleep(next - now);
            }
            // Skip ticks we were too slow for
            next = next.max(Instant::now()) + period;

            let (primary, secondary) = {
                let _guard = self.gate.lock();
                if self.token.is_cancelled() {
                    break;
                }
                (
                    self.primary.as_ref().and_then(MediaTrack::latest_frame),
                    self.secondary.as_ref().and_then(MediaTrack::latest_frame),
                )
            };

            self.compositor.draw(primary.as_ref(), secondary.as_ref());
            let frame = self.compositor.snapshot(started.elapsed().as_secs_f64() * 1000.0);

            let _guard = self.gate.lock();
            if self.token.is_cancelled() || !self.publisher.publish(frame) {
                break;
            }
            self.frames.fetch_add(1, Ordering::Relaxed);
        }

        tracing::debug!(
            "Compositor loop exited after {} frames",
            self.frames.load(Ordering::Relaxed)
        );
    }
}

/// Controls a running compositor loop
#[derive(Debug)]
pub struct CompositorHandle {
    token: CancellationToken,
    gate: Arc<Mutex<()>>,
    frames: Arc<AtomicU64>,
    output_track: MediaTrack,
    cancelled: AtomicBool,
}

impl CompositorHandle {
    /// Stop the render loop. Returns true only for the call that stopped it.
    /// Once this returns no source frame is read and no frame is published.
    /// It only waits for the short read or publish step, never a draw.
    pub fn cancel(&self) -> bool {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.token.cancel();
        drop(self.gate.lock());
        self.output_track.stop();
        tracing::debug!(
            "Compositor cancelled after {} frames",
            self.frames.load(Ordering::Relaxed)
        );
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn frames_drawn(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}

impl Drop for CompositorHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}
