//! Media capture
//!
//! Display and camera sources, the streams they produce, and the session
//! that owns them for the length of one recording.

pub mod session;
pub mod stream;
pub mod synthetic;
pub mod traits;

#[cfg(feature = "native-audio")]
pub mod audio;
#[cfg(feature = "native-display")]
pub mod screen;
#[cfg(feature = "native-camera")]
pub mod webcam;

pub use session::{CameraConfig, CameraRole, CaptureSources, DisplayConfig, MediaCaptureSession};
pub use stream::{
    AudioChunk, AudioFormat, AudioPublisher, CaptureStream, FramePublisher, MediaTrack, TrackKind,
    VideoFrame,
};
pub use synthetic::{SyntheticAudio, SyntheticCamera, SyntheticDisplay};
pub use traits::{
    AudioInput, AudioSource, CameraInfo, CameraSource, CaptureError, CaptureResult, DisplaySource,
    QualityTier, Resolution, StreamKind, OVERLAY_CAMERA_RESOLUTION,
};
