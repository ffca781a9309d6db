//! In-process frame log encoder
//!
//! Records one fixed-size entry per sampled frame instead of compressed
//! video. Used for headless runs and tests where no FFmpeg is available.
//!
//! Layout (little endian):
//!
//! ```text
//! header  "SCFL" | version u16 | reserved u16 | width u32 | height u32
//! entry   index u64 | timestamp_ms u32 | center pixel RGBA
//! ```

use super::{EncoderEvent, MediaEncoder, ENCODER_FPS};
use crate::capture::{CaptureStream, Resolution};
use crate::recorder::error::{RecordingError, RecordingResult};
use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub const FRAME_LOG_MIME: &str = "application/x-frame-log";

const MAGIC: &[u8; 4] = b"SCFL";
const VERSION: u16 = 1;
const HEADER_LEN: usize = 16;
const ENTRY_LEN: usize = 16;

/// One sampled frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLogEntry {
    pub index: u64,
    pub timestamp_ms: u32,
    pub sample: [u8; 4],
}

/// A decoded frame log
#[derive(Debug, Clone, PartialEq)]
pub struct FrameLog {
    pub resolution: Resolution,
    pub entries: Vec<FrameLogEntry>,
}

impl FrameLog {
    pub fn parse(bytes: &[u8]) -> RecordingResult<Self> {
        let invalid = |msg: &str| RecordingError::Encoding(format!("Invalid frame log: {msg}"));

        if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
            return Err(invalid("bad header"));
        }
        let mut buf = &bytes[4..];
        let version = buf.get_u16_le();
        if version != VERSION {
            return Err(invalid("unsupported version"));
        }
        let _reserved = buf.get_u16_le();
        let resolution = Resolution::new(buf.get_u32_le(), buf.get_u32_le());

        if buf.remaining() % ENTRY_LEN != 0 {
            return Err(invalid("truncated entry"));
        }

        let mut entries = Vec::with_capacity(buf.remaining() / ENTRY_LEN);
        while buf.has_remaining() {
            let index = buf.get_u64_le();
            let timestamp_ms = buf.get_u32_le();
            let mut sample = [0u8; 4];
            buf.copy_to_slice(&mut sample);
            entries.push(FrameLogEntry {
                index,
                timestamp_ms,
                sample,
            });
        }

        Ok(Self {
            resolution,
            entries,
        })
    }

    /// Timestamp of the last sampled frame
    pub fn duration_ms(&self) -> u32 {
        self.entries.last().map(|e| e.timestamp_ms).unwrap_or(0)
    }
}

/// Encoder writing a [`FrameLog`]
pub struct FrameLogEncoder {
    fps: u32,
    timeslice: Duration,
    stop: Option<CancellationToken>,
}

impl FrameLogEncoder {
    pub fn new() -> Self {
        Self {
            fps: ENCODER_FPS,
            timeslice: Duration::from_secs(1),
            stop: None,
        }
    }

    /// Interval between emitted chunks
    pub fn with_timeslice(mut self, timeslice: Duration) -> Self {
        self.timeslice = timeslice;
        self
    }
}

impl Default for FrameLogEncoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaEncoder for FrameLogEncoder {
    fn mime_type(&self) -> &str {
        FRAME_LOG_MIME
    }

    async fn start(
        &mut self,
        stream: &CaptureStream,
    ) -> RecordingResult<mpsc::UnboundedReceiver<EncoderEvent>> {
        if self.stop.is_some() {
            return Err(RecordingError::Encoding("Encoder already started".to_string()));
        }
        let track = stream
            .video_track()
            .cloned()
            .ok_or_else(|| RecordingError::Encoding("Stream has no video track".to_string()))?;
        let resolution = stream.resolution();

        let (tx, rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        self.stop = Some(token.clone());

        let fps = self.fps;
        let timeslice = self.timeslice;

        tokio::spawn(async move {
            let mut pending = BytesMut::with_capacity(HEADER_LEN);
            pending.put_slice(MAGIC);
            pending.put_u16_le(VERSION);
            pending.put_u16_le(0);
            pending.put_u32_le(resolution.width);
            pending.put_u32_le(resolution.height);

            let started = Instant::now();
            let mut frames = tokio::time::interval(Duration::from_secs_f64(1.0 / fps.max(1) as f64));
            frames.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut slices = tokio::time::interval_at(started + timeslice, timeslice);
            let mut index = 0u64;

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = slices.tick() => {
                        let _ = tx.send(EncoderEvent::Data(pending.split().freeze()));
                    }
                    _ = frames.tick() => {
                        let Some(frame) = track.latest_frame() else { continue };
                        let sample = frame
                            .pixel(frame.width / 2, frame.height / 2)
                            .unwrap_or([0; 4]);
                        let ts = started.elapsed().as_millis().min(u32::MAX as u128) as u32;

                        pending.put_u64_le(index);
                        pending.put_u32_le(ts);
                        pending.put_slice(&sample);
                        index += 1;
                    }
                }
            }

            // Final flush, then the stopped notification
            let _ = tx.send(EncoderEvent::Data(pending.split().freeze()));
            let _ = tx.send(EncoderEvent::Stopped);
            tracing::debug!("Frame log encoder wrote {} entries", index);
        });

        Ok(rx)
    }

    async fn stop(&mut self) -> RecordingResult<()> {
        match &self.stop {
            Some(token) => {
                token.cancel();
                Ok(())
            }
            None => Err(RecordingError::NotRecording),
        }
    }
}
