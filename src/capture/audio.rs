//! Native audio capture using cpal
//!
//! Each opened track runs its cpal input stream on a dedicated thread, since
//! streams are not `Send` on every host. The callback converts whatever the
//! device delivers to interleaved f32 and publishes it to the track.
//!
//! System audio is captured by opening an input stream on the default output
//! device, which hosts with loopback support (WASAPI) accept. Elsewhere the
//! open fails and callers carry on without system audio.

use super::stream::{AudioFormat, AudioPublisher, MediaTrack};
use super::traits::{AudioInput, AudioSource, CaptureError, CaptureResult};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, StreamConfig, SupportedStreamConfig};
use std::time::Duration;
use tokio::sync::oneshot;

/// How often the capture thread checks whether its track was stopped
const STOP_POLL: Duration = Duration::from_millis(50);

/// Audio source backed by the platform audio host
#[derive(Debug, Clone, Default)]
pub struct NativeAudio;

impl NativeAudio {
    pub fn new() -> Self {
        Self
    }
}

fn open_device(input: AudioInput) -> CaptureResult<(Device, SupportedStreamConfig)> {
    let host = cpal::default_host();
    match input {
        AudioInput::Microphone => {
            let device = host
                .default_input_device()
                .ok_or_else(|| CaptureError::DeviceUnavailable("No microphone found".to_string()))?;
            let config = device.default_input_config().map_err(|e| {
                CaptureError::DeviceUnavailable(format!("Failed to get microphone config: {e}"))
            })?;
            Ok((device, config))
        }
        AudioInput::System => {
            let device = host.default_output_device().ok_or_else(|| {
                CaptureError::DeviceUnavailable("No output device for system audio".to_string())
            })?;
            let config = device.default_output_config().map_err(|e| {
                CaptureError::DeviceUnavailable(format!("Failed to get output config: {e}"))
            })?;
            Ok((device, config))
        }
    }
}

fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

fn u16_to_f32(sample: u16) -> f32 {
    (sample as f32 - 32768.0) / 32768.0
}

fn build_stream(
    device: &Device,
    format: SampleFormat,
    config: &StreamConfig,
    publisher: AudioPublisher,
) -> Result<cpal::Stream, cpal::BuildStreamError> {
    let on_error = |err: cpal::StreamError| tracing::error!("Audio stream error: {}", err);

    match format {
        SampleFormat::I16 => device.build_input_stream(
            config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                publisher.publish(data.iter().copied().map(i16_to_f32).collect());
            },
            on_error,
            None,
        ),
        SampleFormat::U16 => device.build_input_stream(
            config,
            move |data: &[u16], _: &cpal::InputCallbackInfo| {
                publisher.publish(data.iter().copied().map(u16_to_f32).collect());
            },
            on_error,
            None,
        ),
        _ => device.build_input_stream(
            config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                publisher.publish(data.to_vec());
            },
            on_error,
            None,
        ),
    }
}

/// Open the device and keep its stream playing until the track is stopped
fn run_capture(input: AudioInput, opened: oneshot::Sender<CaptureResult<MediaTrack>>) {
    let (device, supported) = match open_device(input) {
        Ok(found) => found,
        Err(e) => {
            let _ = opened.send(Err(e));
            return;
        }
    };
    let label = match input {
        AudioInput::Microphone => device.name().unwrap_or_else(|_| input.to_string()),
        AudioInput::System => input.to_string(),
    };

    let config: StreamConfig = supported.config();
    let format = AudioFormat::new(config.sample_rate.0, config.channels);
    let (track, publisher) = MediaTrack::audio(label, format);
    let watcher = publisher.clone();

    let stream = match build_stream(&device, supported.sample_format(), &config, publisher) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = opened.send(Err(CaptureError::DeviceUnavailable(format!(
                "Failed to open {input}: {e}"
            ))));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = opened.send(Err(CaptureError::PermissionDenied(format!(
            "Failed to start {input}: {e}"
        ))));
        return;
    }

    tracing::info!(
        "Audio opened: {} ({}Hz, {}ch)",
        input,
        format.sample_rate,
        format.channels
    );

    if opened.send(Ok(track)).is_err() {
        return;
    }

    while !watcher.is_stopped() {
        std::thread::sleep(STOP_POLL);
    }

    if let Err(e) = stream.pause() {
        tracing::debug!("Error pausing audio stream: {}", e);
    }
    tracing::debug!("Audio capture stopped: {}", input);
}

#[async_trait]
impl AudioSource for NativeAudio {
    async fn open_audio(&self, input: AudioInput) -> CaptureResult<MediaTrack> {
        let (opened_tx, opened_rx) = oneshot::channel();
        std::thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || run_capture(input, opened_tx))
            .map_err(|e| CaptureError::Backend(format!("Failed to spawn audio thread: {e}")))?;

        match opened_rx.await {
            Ok(result) => result,
            Err(_) => Err(CaptureError::Backend(
                "Audio thread exited before opening the device".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_samples_map_to_unit_range() {
        assert_eq!(i16_to_f32(0), 0.0);
        assert_eq!(i16_to_f32(i16::MIN), -1.0);
        assert!(i16_to_f32(i16::MAX) < 1.0);
        assert_eq!(u16_to_f32(32768), 0.0);
        assert_eq!(u16_to_f32(0), -1.0);
    }
}
