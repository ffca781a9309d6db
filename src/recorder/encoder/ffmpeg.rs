//! FFmpeg WebM encoder
//!
//! Raw RGBA frames from the stream's video track are piped into FFmpeg's
//! stdin; the WebM it writes to stdout is forwarded as chunks. When the
//! stream carries audio, its first audio track is served to FFmpeg as raw
//! f32 PCM over a loopback TCP connection and muxed as Opus.
//!
//! Both inputs are paced by the wall clock. When FFmpeg falls behind, the
//! latest frame is repeated and missing audio is padded with silence, so the
//! output always spans the time between `start` and `stop`.

use super::{EncoderEvent, MediaEncoder, ENCODER_FPS, WEBM_VP9_MIME};
use crate::capture::{AudioChunk, AudioFormat, CaptureStream, MediaTrack, Resolution, VideoFrame};
use crate::compositor::fit_frame;
use crate::recorder::error::{RecordingError, RecordingResult};
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::VecDeque;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::process::{Child, Command};
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Container/codecs of WebM recordings with sound
pub const WEBM_VP9_OPUS_MIME: &str = "video/webm;codecs=vp9,opus";

const READ_CHUNK: usize = 64 * 1024;
const AUDIO_PERIOD: Duration = Duration::from_millis(20);
/// Audio buffered ahead of the clock before the oldest samples are dropped
const MAX_AUDIO_BACKLOG: Duration = Duration::from_secs(1);

/// When stop was requested; `None` while recording
type StopSignal = watch::Receiver<Option<Instant>>;

/// Frames due after `elapsed` at `fps`, rounded to the nearest frame
fn frames_due(elapsed: Duration, fps: u32) -> u64 {
    (elapsed.as_secs_f64() * fps as f64).round() as u64
}

/// Wait for the next tick. Resolves to the stop time once stop is requested.
async fn next_tick(ticker: &mut tokio::time::Interval, stop: &mut StopSignal) -> Option<Instant> {
    tokio::select! {
        biased;
        _ = stop.changed() => Some((*stop.borrow()).unwrap_or_else(Instant::now)),
        _ = ticker.tick() => None,
    }
}

/// Encoder backed by an `ffmpeg` child process
pub struct FfmpegEncoder {
    binary: String,
    fps: u32,
    mime_type: &'static str,
    stop: Option<watch::Sender<Option<Instant>>>,
    writers: Vec<JoinHandle<()>>,
}

impl FfmpegEncoder {
    pub fn new() -> Self {
        Self {
            binary: "ffmpeg".to_string(),
            fps: ENCODER_FPS,
            mime_type: WEBM_VP9_MIME,
            stop: None,
            writers: Vec::new(),
        }
    }

    /// Use a specific ffmpeg executable
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    fn args(&self, size: Resolution, audio: Option<(AudioFormat, u16)>) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-f".into(),
            "rawvideo".into(),
            "-pix_fmt".into(),
            "rgba".into(),
            "-s".into(),
            size.to_string(),
            "-r".into(),
            self.fps.to_string(),
            "-i".into(),
            "-".into(), // stdin for video frames
        ];

        if let Some((format, port)) = audio {
            args.extend([
                "-thread_queue_size".into(),
                "1024".into(),
                "-f".into(),
                "f32le".into(),
                "-ar".into(),
                format.sample_rate.to_string(),
                "-ac".into(),
                format.channels.to_string(),
                "-i".into(),
                format!("tcp://127.0.0.1:{port}"),
                "-map".into(),
                "0:v:0".into(),
                "-map".into(),
                "1:a:0".into(),
                "-c:a".into(),
                "libopus".into(),
                "-b:a".into(),
                "128k".into(),
            ]);
        }

        args.extend([
            "-c:v".into(),
            "libvpx-vp9".into(),
            "-deadline".into(),
            "realtime".into(),
            "-cpu-used".into(),
            "8".into(),
            "-b:v".into(),
            "2M".into(),
            "-f".into(),
            "webm".into(),
            "-".into(), // stdout
        ]);
        args
    }
}

impl Default for FfmpegEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Write one frame per tick of the wall clock until stop, repeating the
/// latest frame when the writes fall behind. Closing the output tells FFmpeg
/// to finish the file.
async fn write_video<W>(
    mut out: W,
    track: MediaTrack,
    target: Resolution,
    fps: u32,
    started: Instant,
    mut stop: StopSignal,
) where
    W: AsyncWrite + Unpin,
{
    let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / fps.max(1) as f64));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut latest: Option<VideoFrame> = None;
    let mut written = 0u64;
    let mut repeated = 0u64;

    'ticks: loop {
        let stop_at = next_tick(&mut ticker, &mut stop).await;
        let until = stop_at.unwrap_or_else(Instant::now);
        let due = frames_due(until.saturating_duration_since(started), fps);

        if let Some(frame) = track.latest_frame() {
            latest = Some(fit_frame(frame, target));
        }
        // Black until the source publishes its first frame
        let frame = latest.get_or_insert_with(|| VideoFrame::solid(target, [0, 0, 0, 255], 0.0));

        if due > written + 1 {
            repeated += due - written - 1;
        }
        while written < due {
            if let Err(e) = out.write_all(&frame.data).await {
                tracing::warn!("FFmpeg stdin closed: {}", e);
                break 'ticks;
            }
            written += 1;
        }

        if stop_at.is_some() {
            break;
        }
    }

    if let Err(e) = out.shutdown().await {
        tracing::debug!("Closing FFmpeg stdin: {}", e);
    }
    tracing::info!("FFmpeg encoder received {} frames ({} repeated)", written, repeated);
}

/// Serve PCM to the first connection on `listener` until stop. The byte
/// count always matches the wall clock: missing samples become silence and
/// a backlog beyond [`MAX_AUDIO_BACKLOG`] is dropped.
async fn serve_audio(
    listener: TcpListener,
    mut samples: broadcast::Receiver<AudioChunk>,
    format: AudioFormat,
    started: Instant,
    mut stop: StopSignal,
) {
    let mut socket = tokio::select! {
        biased;
        _ = stop.changed() => {
            tracing::debug!("FFmpeg never connected for audio");
            return;
        }
        accepted = listener.accept() => match accepted {
            Ok((socket, _)) => socket,
            Err(e) => {
                tracing::warn!("Accepting FFmpeg audio connection: {}", e);
                return;
            }
        },
    };
    drop(listener);

    let channels = format.channels.max(1) as usize;
    let max_backlog = format.frames_for(MAX_AUDIO_BACKLOG) as usize * channels;
    let mut pending: VecDeque<f32> = VecDeque::new();
    let mut buf = BytesMut::new();
    let mut written = 0u64;
    let mut padded = 0usize;

    let mut ticker = tokio::time::interval(AUDIO_PERIOD);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let stop_at = next_tick(&mut ticker, &mut stop).await;

        loop {
            match samples.try_recv() {
                Ok(chunk) => pending.extend(chunk.samples.iter().copied()),
                Err(TryRecvError::Lagged(n)) => tracing::debug!("Audio writer skipped {} chunks", n),
                Err(_) => break,
            }
        }

        let until = stop_at.unwrap_or_else(Instant::now);
        let due = format.frames_for(until.saturating_duration_since(started));
        if due > written {
            let needed = (due - written) as usize * channels;
            buf.clear();
            buf.reserve(needed * 4);
            for _ in 0..needed {
                match pending.pop_front() {
                    Some(sample) => buf.put_f32_le(sample),
                    None => {
                        buf.put_f32_le(0.0);
                        padded += 1;
                    }
                }
            }
            if let Err(e) = socket.write_all(&buf).await {
                tracing::warn!("FFmpeg audio input closed: {}", e);
                break;
            }
            written = due;
        }

        if pending.len() > max_backlog {
            let excess = pending.len() - max_backlog;
            pending.drain(..excess - excess % channels);
        }

        if stop_at.is_some() {
            break;
        }
    }

    if let Err(e) = socket.shutdown().await {
        tracing::debug!("Closing FFmpeg audio input: {}", e);
    }
    tracing::info!(
        "FFmpeg encoder received {} audio frames ({} samples of silence)",
        written,
        padded
    );
}

/// Forward stdout until EOF, then report how the process exited
async fn forward_output<R>(
    mut stdout: R,
    mut child: Child,
    tx: mpsc::UnboundedSender<EncoderEvent>,
) where
    R: AsyncRead + Unpin,
{
    let mut stderr = child.stderr.take();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match stdout.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let _ = tx.send(EncoderEvent::Data(Bytes::copy_from_slice(&buf[..n])));
            }
            Err(e) => {
                let _ = tx.send(EncoderEvent::Failed(format!("Reading FFmpeg output: {e}")));
                return;
            }
        }
    }

    let mut diagnostics = String::new();
    if let Some(stderr) = stderr.as_mut() {
        let _ = stderr.read_to_string(&mut diagnostics).await;
    }

    match child.wait().await {
        Ok(status) if status.success() => {
            let _ = tx.send(EncoderEvent::Stopped);
        }
        Ok(status) => {
            tracing::warn!("FFmpeg exited with status {}: {}", status, diagnostics.trim());
            let _ = tx.send(EncoderEvent::Failed(format!(
                "FFmpeg exited with status {status}"
            )));
        }
        Err(e) => {
            let _ = tx.send(EncoderEvent::Failed(format!("Waiting for FFmpeg: {e}")));
        }
    }
}

#[async_trait]
impl MediaEncoder for FfmpegEncoder {
    fn mime_type(&self) -> &str {
        self.mime_type
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
        let target = stream.resolution();

        let audio = stream
            .audio_tracks()
            .find_map(|track| Some((track.audio_format()?, track.subscribe_audio()?)));
        let audio = match audio {
            Some((format, samples)) => {
                let listener = TcpListener::bind(("127.0.0.1", 0)).await.map_err(|e| {
                    RecordingError::Encoding(format!("Failed to open audio input: {e}"))
                })?;
                let port = listener
                    .local_addr()
                    .map_err(|e| RecordingError::Encoding(format!("Failed to open audio input: {e}")))?
                    .port();
                Some((format, port, listener, samples))
            }
            None => None,
        };

        let args = self.args(target, audio.as_ref().map(|(format, port, ..)| (*format, *port)));
        let mut child = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RecordingError::Encoding(format!("Failed to start FFmpeg: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RecordingError::Encoding("Failed to capture FFmpeg stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RecordingError::Encoding("Failed to capture FFmpeg stdout".to_string()))?;

        let started = Instant::now();
        let (stop_tx, stop_rx) = watch::channel(None);
        self.mime_type = if audio.is_some() {
            WEBM_VP9_OPUS_MIME
        } else {
            WEBM_VP9_MIME
        };

        tracing::info!(
            "Started FFmpeg encoder: {} @ {}fps ({})",
            target,
            self.fps,
            self.mime_type
        );

        self.writers.push(tokio::spawn(write_video(
            stdin,
            track,
            target,
            self.fps,
            started,
            stop_rx.clone(),
        )));
        if let Some((format, _, listener, samples)) = audio {
            self.writers
                .push(tokio::spawn(serve_audio(listener, samples, format, started, stop_rx)));
        }
        self.stop = Some(stop_tx);

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(forward_output(stdout, child, tx));
        Ok(rx)
    }

    async fn stop(&mut self) -> RecordingResult<()> {
        let stop = self.stop.as_ref().ok_or(RecordingError::NotRecording)?;
        stop.send_replace(Some(Instant::now()));

        for writer in self.writers.drain(..) {
            writer
                .await
                .map_err(|e| RecordingError::Encoding(format!("Encoder input failed: {e}")))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{FramePublisher, StreamKind};
    use tokio::net::TcpStream;

    #[test]
    fn args_describe_raw_rgba_to_webm() {
        let args = FfmpegEncoder::new().args(Resolution::new(1280, 720), None);
        let joined = args.join(" ");
        assert!(joined.contains("-f rawvideo -pix_fmt rgba -s 1280x720 -r 30 -i -"));
        assert!(joined.contains("-c:v libvpx-vp9"));
        assert!(!joined.contains("libopus"));
        assert!(joined.ends_with("-f webm -"));
    }

    #[test]
    fn args_mux_audio_from_loopback() {
        let args = FfmpegEncoder::new().args(Resolution::new(640, 480), Some((AudioFormat::new(44_100, 1), 4321)));
        let joined = args.join(" ");
        assert!(joined.contains("-f f32le -ar 44100 -ac 1 -i tcp://127.0.0.1:4321"));
        assert!(joined.contains("-map 0:v:0 -map 1:a:0 -c:a libopus"));
        assert!(joined.ends_with("-f webm -"));
    }

    #[test]
    fn frames_due_follows_the_clock() {
        assert_eq!(frames_due(Duration::ZERO, 30), 0);
        assert_eq!(frames_due(Duration::from_millis(1000), 30), 30);
        assert_eq!(frames_due(Duration::from_millis(3010), 30), 90);
    }

    #[tokio::test]
    async fn missing_binary_fails_to_start() {
        let (video, _publisher) = MediaTrack::video("screen");
        let stream = CaptureStream::new(StreamKind::Display, Resolution::new(4, 4)).with_track(video);

        let mut encoder = FfmpegEncoder::new().with_binary("/nonexistent/ffmpeg-binary");
        let err = encoder.start(&stream).await.unwrap_err();
        assert!(matches!(err, RecordingError::Encoding(_)));
    }

    #[tokio::test]
    async fn audio_byte_count_matches_the_clock() {
        let format = AudioFormat::new(8_000, 1);
        let (track, publisher) = MediaTrack::audio("microphone", format);
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = watch::channel(None);
        let samples = track.subscribe_audio().unwrap();
        publisher.publish(vec![0.5; 100]);
        let started = Instant::now();

        let server = tokio::spawn(serve_audio(listener, samples, format, started, stop_rx));
        let mut client = TcpStream::connect(addr).await.unwrap();

        // Stop lands ahead of what has been written so far
        tokio::time::sleep(Duration::from_millis(300)).await;
        stop_tx.send_replace(Some(started + Duration::from_millis(500)));

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        server.await.unwrap();

        // 0.5 s at 8 kHz mono, four bytes per sample
        assert_eq!(received.len(), 4_000 * 4);
        assert_eq!(&received[..4], &0.5f32.to_le_bytes());
        assert_eq!(&received[received.len() - 4..], &0.0f32.to_le_bytes());
    }

    #[cfg(unix)]
    mod stand_in {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use std::path::PathBuf;

        /// An executable shell script standing in for ffmpeg
        fn script(dir: &tempfile::TempDir, body: &str) -> PathBuf {
            let path = dir.path().join("ffmpeg");
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        fn screen(size: Resolution) -> (CaptureStream, FramePublisher) {
            let (video, publisher) = MediaTrack::video("screen");
            publisher.publish(VideoFrame::solid(size, [5, 6, 7, 255], 0.0));
            (CaptureStream::new(StreamKind::Display, size).with_track(video), publisher)
        }

        async fn drain(mut events: mpsc::UnboundedReceiver<EncoderEvent>) -> (Vec<u8>, Vec<EncoderEvent>) {
            let mut data = Vec::new();
            let mut rest = Vec::new();
            while let Some(event) = events.recv().await {
                match event {
                    EncoderEvent::Data(chunk) => {
                        assert!(rest.is_empty(), "data after the final event");
                        data.extend_from_slice(&chunk);
                    }
                    other => rest.push(other),
                }
            }
            (data, rest)
        }

        #[tokio::test]
        async fn output_is_forwarded_in_order_then_stopped() {
            let dir = tempfile::tempdir().unwrap();
            let binary = script(&dir, "printf 'head-'\ncat > /dev/null\nprintf 'tail'");
            let (stream, _publisher) = screen(Resolution::new(4, 4));

            let mut encoder = FfmpegEncoder::new().with_binary(binary.to_string_lossy());
            let events = encoder.start(&stream).await.unwrap();
            assert_eq!(encoder.mime_type(), WEBM_VP9_MIME);

            tokio::time::sleep(Duration::from_millis(200)).await;
            encoder.stop().await.unwrap();

            let (data, rest) = drain(events).await;
            assert_eq!(data, b"head-tail");
            assert_eq!(rest, vec![EncoderEvent::Stopped]);
        }

        #[tokio::test]
        async fn nonzero_exit_is_a_failure() {
            let dir = tempfile::tempdir().unwrap();
            let binary = script(&dir, "cat > /dev/null\necho broken >&2\nexit 3");
            let (stream, _publisher) = screen(Resolution::new(4, 4));

            let mut encoder = FfmpegEncoder::new().with_binary(binary.to_string_lossy());
            let events = encoder.start(&stream).await.unwrap();
            encoder.stop().await.unwrap();

            let (_, rest) = drain(events).await;
            assert_eq!(rest.len(), 1);
            assert!(matches!(&rest[0], EncoderEvent::Failed(msg) if msg.contains("status")));
        }

        #[tokio::test]
        async fn stalled_encoder_still_receives_every_frame() {
            let dir = tempfile::tempdir().unwrap();
            // Reads nothing for a second, then counts what it was sent
            let binary = script(&dir, "sleep 1\nwc -c");
            let size = Resolution::new(64, 64);
            let (stream, _publisher) = screen(size);

            let mut encoder = FfmpegEncoder::new().with_binary(binary.to_string_lossy());
            let began = Instant::now();
            let events = encoder.start(&stream).await.unwrap();
            tokio::time::sleep(Duration::from_millis(1500)).await;
            let elapsed = began.elapsed();
            encoder.stop().await.unwrap();

            let (data, rest) = drain(events).await;
            assert_eq!(rest, vec![EncoderEvent::Stopped]);
            let bytes: u64 = String::from_utf8(data).unwrap().trim().parse().unwrap();
            assert_eq!(bytes % size.rgba_len() as u64, 0);

            let frames = bytes / size.rgba_len() as u64;
            let expected = frames_due(elapsed, ENCODER_FPS);
            assert!(frames + 3 >= expected && frames <= expected + 3, "{frames} frames, expected {expected}");
        }

        #[tokio::test]
        async fn audio_streams_report_opus() {
            let dir = tempfile::tempdir().unwrap();
            let binary = script(&dir, "cat > /dev/null");
            let (mut stream, _publisher) = screen(Resolution::new(4, 4));
            let (audio, _samples) = MediaTrack::audio("system audio", AudioFormat::default());
            stream.add_track(audio);

            let mut encoder = FfmpegEncoder::new().with_binary(binary.to_string_lossy());
            let events = encoder.start(&stream).await.unwrap();
            assert_eq!(encoder.mime_type(), WEBM_VP9_OPUS_MIME);

            // Nobody connects for audio; stop must still finish
            encoder.stop().await.unwrap();
            let (_, rest) = drain(events).await;
            assert_eq!(rest, vec![EncoderEvent::Stopped]);
        }
    }
}
