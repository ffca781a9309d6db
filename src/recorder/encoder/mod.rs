//! Media encoders
//!
//! An encoder binds to a capture stream and emits encoded chunks on a channel
//! as they become available. `stop` asks it to finalize; the last chunk is
//! flushed before [`EncoderEvent::Stopped`] is sent.

pub mod ffmpeg;
pub mod frame_log;

pub use ffmpeg::FfmpegEncoder;
pub use frame_log::{FrameLog, FrameLogEncoder, FrameLogEntry};

use super::error::RecordingResult;
use crate::capture::CaptureStream;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Container/codec of WebM recordings
pub const WEBM_VP9_MIME: &str = "video/webm;codecs=vp9";

/// Rate at which encoders sample their input track
pub const ENCODER_FPS: u32 = 30;

/// Output of a running encoder
#[derive(Debug, Clone, PartialEq)]
pub enum EncoderEvent {
    /// A chunk of encoded output. May be empty.
    Data(Bytes),
    /// Encoding finished; no more events follow
    Stopped,
    /// Encoding failed; no more events follow
    Failed(String),
}

/// An encoder bound to one stream for one recording
#[async_trait]
pub trait MediaEncoder: Send {
    /// Container/codec tag of the produced bytes
    fn mime_type(&self) -> &str;

    /// Bind to the stream and begin encoding
    async fn start(
        &mut self,
        stream: &CaptureStream,
    ) -> RecordingResult<mpsc::UnboundedReceiver<EncoderEvent>>;

    /// Ask the encoder to finalize. The final chunk and `Stopped` arrive on
    /// the event channel afterwards.
    async fn stop(&mut self) -> RecordingResult<()>;
}

/// Creates a fresh encoder for each recording
pub type EncoderFactory = Arc<dyn Fn() -> Box<dyn MediaEncoder> + Send + Sync>;
