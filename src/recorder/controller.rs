//! Recording controller
//!
//! The state machine behind one recorder: idle → recording → stopped → idle.
//! It owns the encoder, the chunk accumulator and the elapsed-time tick, and
//! it is the one place that tears a recording's sources down.

use super::encoder::{EncoderEvent, EncoderFactory, MediaEncoder};
use super::error::{RecordingError, RecordingResult};
use super::state::{Artifact, Notice, RecordingEvent, RecordingOptions, RecordingState};
use crate::capture::{CaptureStream, MediaCaptureSession};
use crate::compositor::CompositorHandle;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Everything a recording reads from, released together when it ends
pub struct RecordingSource {
    session: MediaCaptureSession,
    compositor: Option<CompositorHandle>,
    output: CaptureStream,
}

impl RecordingSource {
    /// Record `output`, one of the session's own streams
    pub fn new(session: MediaCaptureSession, output: CaptureStream) -> Self {
        Self {
            session,
            compositor: None,
            output,
        }
    }

    /// Record a composite stream derived from the session's streams
    pub fn composited(
        session: MediaCaptureSession,
        compositor: CompositorHandle,
        output: CaptureStream,
    ) -> Self {
        Self {
            session,
            compositor: Some(compositor),
            output,
        }
    }

    pub fn output(&self) -> &CaptureStream {
        &self.output
    }

    pub fn compositor(&self) -> Option<&CompositorHandle> {
        self.compositor.as_ref()
    }

    /// Cancel the compositor, then stop every track. Idempotent.
    pub fn release(&mut self) -> usize {
        if let Some(compositor) = &self.compositor {
            compositor.cancel();
        }
        self.output.stop_all() + self.session.release()
    }
}

/// Drives one recording at a time
pub struct RecordingController {
    state: RecordingState,
    encoders: EncoderFactory,
    encoder: Option<Box<dyn MediaEncoder>>,
    source: Option<RecordingSource>,
    chunks: Arc<Mutex<Vec<Bytes>>>,
    pump: Option<JoinHandle<Option<String>>>,
    elapsed: Arc<AtomicU64>,
    ticker: Option<JoinHandle<()>>,
    options: Option<RecordingOptions>,
    artifact: Option<Artifact>,
    event_tx: broadcast::Sender<RecordingEvent>,
}

impl RecordingController {
    pub fn new(encoders: EncoderFactory) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            state: RecordingState::Idle,
            encoders,
            encoder: None,
            source: None,
            chunks: Arc::new(Mutex::new(Vec::new())),
            pump: None,
            elapsed: Arc::new(AtomicU64::new(0)),
            ticker: None,
            options: None,
            artifact: None,
            event_tx,
        }
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    /// Whole seconds recorded so far
    pub fn elapsed_secs(&self) -> u64 {
        self.elapsed.load(Ordering::SeqCst)
    }

    pub fn options(&self) -> Option<RecordingOptions> {
        self.options
    }

    pub fn artifact(&self) -> Option<&Artifact> {
        self.artifact.as_ref()
    }

    /// Subscribe to recording events
    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.event_tx.subscribe()
    }

    pub(crate) fn notify(&self, notice: Notice) {
        let _ = self.event_tx.send(RecordingEvent::Notice(notice));
    }

    /// Start recording the source's output stream.
    ///
    /// Starting while already recording does nothing (the extra source is
    /// released). Starting with an unconsumed artifact is rejected.
    pub async fn start(
        &mut self,
        mut source: RecordingSource,
        options: RecordingOptions,
    ) -> RecordingResult<()> {
        match self.state {
            RecordingState::Idle => {}
            RecordingState::Recording => {
                tracing::warn!("Start requested while already recording; ignoring");
                source.release();
                return Ok(());
            }
            RecordingState::Stopped => {
                source.release();
                return Err(RecordingError::InvalidTransition {
                    from: self.state,
                    action: "start",
                });
            }
        }

        let mut encoder = (self.encoders)();
        let events = match encoder.start(source.output()).await {
            Ok(events) => events,
            Err(e) => {
                tracing::error!("Failed to start encoder: {}", e);
                source.release();
                return Err(e);
            }
        };

        self.chunks.lock().clear();
        self.elapsed.store(0, Ordering::SeqCst);
        self.pump = Some(Self::spawn_pump(events, self.chunks.clone()));
        self.ticker = Some(Self::spawn_ticker(self.elapsed.clone(), self.event_tx.clone()));

        tracing::info!(
            "Recording started: {} ({}) from {} stream {}",
            options.mode,
            options.quality,
            source.output().kind(),
            source.output().id()
        );

        self.encoder = Some(encoder);
        self.source = Some(source);
        self.options = Some(options);
        self.state = RecordingState::Recording;
        let _ = self.event_tx.send(RecordingEvent::Started(options));
        Ok(())
    }

    /// Append every non-empty chunk in arrival order until the encoder stops.
    /// Resolves to the failure message if the encoder failed.
    fn spawn_pump(
        mut events: mpsc::UnboundedReceiver<EncoderEvent>,
        chunks: Arc<Mutex<Vec<Bytes>>>,
    ) -> JoinHandle<Option<String>> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    EncoderEvent::Data(chunk) if chunk.is_empty() => {}
                    EncoderEvent::Data(chunk) => chunks.lock().push(chunk),
                    EncoderEvent::Stopped => return None,
                    EncoderEvent::Failed(e) => return Some(e),
                }
            }
            Some("Encoder went away without stopping".to_string())
        })
    }

    fn spawn_ticker(
        elapsed: Arc<AtomicU64>,
        event_tx: broadcast::Sender<RecordingEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = Duration::from_secs(1);
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let secs = elapsed.fetch_add(1, Ordering::SeqCst) + 1;
                let _ = event_tx.send(RecordingEvent::Tick(secs));
            }
        })
    }

    /// Finalize the recording.
    ///
    /// Waits for the encoder's final flush, concatenates the chunks, then
    /// releases the compositor and capture streams and clears the tick.
    pub async fn stop(&mut self) -> RecordingResult<Artifact> {
        if self.state != RecordingState::Recording {
            return Err(RecordingError::NotRecording);
        }
        tracing::info!("Stopping recording");

        let mut encoder = self.encoder.take();
        let stopped = match encoder.as_mut() {
            Some(encoder) => encoder.stop().await,
            None => Err(RecordingError::Encoding("No encoder".to_string())),
        };

        let failure = match (stopped, self.pump.take()) {
            (Ok(()), Some(pump)) => match pump.await {
                Ok(failure) => failure,
                Err(e) => Some(format!("Chunk pump failed: {e}")),
            },
            (Ok(()), None) => Some("No chunk pump".to_string()),
            (Err(e), pump) => {
                if let Some(pump) = pump {
                    pump.abort();
                }
                Some(e.to_string())
            }
        };

        let bytes = {
            let mut chunks = self.chunks.lock();
            let mut buf = BytesMut::with_capacity(chunks.iter().map(Bytes::len).sum());
            for chunk in chunks.drain(..) {
                buf.extend_from_slice(&chunk);
            }
            buf.freeze()
        };

        self.release_source();
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        let duration_secs = self.elapsed.load(Ordering::SeqCst);

        if let Some(e) = failure {
            tracing::error!("Recording failed to finalize: {}", e);
            self.reset();
            return Err(RecordingError::Encoding(e));
        }

        let mime_type = encoder
            .as_ref()
            .map(|e| e.mime_type().split(';').next().unwrap_or_default().to_string())
            .unwrap_or_default();
        let options = self.options.unwrap_or_else(|| RecordingOptions {
            mode: Default::default(),
            quality: crate::store::VideoQuality::Standard,
        });

        let artifact = Artifact {
            bytes,
            mime_type,
            duration_secs,
            mode: options.mode,
            quality: options.quality,
            created_at: Utc::now(),
        };

        tracing::info!(
            "Recording stopped: {}s, {} bytes ({})",
            artifact.duration_secs,
            artifact.len(),
            artifact.mime_type
        );

        self.state = RecordingState::Stopped;
        self.artifact = Some(artifact.clone());
        let _ = self.event_tx.send(RecordingEvent::Stopped {
            duration_secs,
            size: artifact.len(),
        });
        Ok(artifact)
    }

    /// Drop the artifact and return to idle. Returns whether anything was
    /// discarded; discarding while idle does nothing.
    pub fn discard(&mut self) -> RecordingResult<bool> {
        match self.state {
            RecordingState::Idle => Ok(false),
            RecordingState::Recording => Err(RecordingError::InvalidTransition {
                from: self.state,
                action: "discard",
            }),
            RecordingState::Stopped => {
                self.reset();
                tracing::info!("Recording discarded");
                let _ = self.event_tx.send(RecordingEvent::Discarded);
                Ok(true)
            }
        }
    }

    /// Move the artifact out (after it was persisted) and return to idle
    pub fn take_artifact(&mut self) -> RecordingResult<Artifact> {
        if self.state != RecordingState::Stopped {
            return Err(RecordingError::InvalidTransition {
                from: self.state,
                action: "take the artifact",
            });
        }
        let artifact = self.artifact.take();
        self.reset();
        artifact.ok_or(RecordingError::NotRecording)
    }

    fn release_source(&mut self) {
        if let Some(mut source) = self.source.take() {
            let stopped = source.release();
            tracing::debug!("Released recording source ({} tracks stopped)", stopped);
        }
    }

    fn reset(&mut self) {
        self.state = RecordingState::Idle;
        self.artifact = None;
        self.options = None;
        self.elapsed.store(0, Ordering::SeqCst);
        self.chunks.lock().clear();
    }
}

impl Drop for RecordingController {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.release_source();
    }
}
