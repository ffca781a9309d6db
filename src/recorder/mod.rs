//! Recording system module
//!
//! - `RecordingController`: the idle/recording/stopped state machine
//! - `MediaEncoder` implementations turning a stream into chunks
//! - `Recorder`: per-mode orchestration on top of both

pub mod controller;
pub mod encoder;
pub mod error;
pub mod state;
pub mod studio;

pub use controller::{RecordingController, RecordingSource};
pub use encoder::{EncoderFactory, FfmpegEncoder, FrameLogEncoder, MediaEncoder};
pub use error::{RecordingError, RecordingResult};
pub use state::{Artifact, ArtifactInfo, Notice, NoticeLevel, RecordingEvent, RecordingOptions, RecordingState};
pub use studio::{Recorder, RecorderStatus};
