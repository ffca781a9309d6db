//! Recorder orchestration
//!
//! Wires the capture session, compositor and controller together for each
//! recording mode, keeps the webcam preview alive between recordings and
//! turns outcomes into user-facing notices.

use super::controller::{RecordingController, RecordingSource};
use super::encoder::EncoderFactory;
use super::error::{RecordingError, RecordingResult};
use super::state::{ArtifactInfo, Notice, RecordingEvent, RecordingOptions, RecordingState};
use crate::capture::{
    CameraConfig, CameraInfo, CameraRole, CaptureError, CaptureSources, CaptureStream,
    DisplayConfig, MediaCaptureSession, QualityTier,
};
use crate::compositor::FrameCompositor;
use crate::store::{VideoQuality, VideoRecord, VideoType};
use crate::upload::UploadCoordinator;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;

const START_FAILED: &str = "Failed to start recording. Please grant permissions.";

fn started_notice(mode: VideoType) -> Notice {
    let description = match mode {
        VideoType::Screen => "Your screen is being recorded",
        VideoType::Webcam => "Your webcam is being recorded",
        VideoType::Combined => "Your screen and webcam are being recorded",
    };
    Notice::info("Recording started", description)
}

/// Snapshot of the recorder for status queries
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecorderStatus {
    pub state: RecordingState,
    pub mode: VideoType,
    pub quality: QualityTier,
    pub elapsed: u64,
    pub camera_id: Option<String>,
    pub previewing: bool,
    pub artifact: Option<ArtifactInfo>,
}

/// A webcam stream kept open between recordings
struct Preview {
    session: MediaCaptureSession,
    stream: CaptureStream,
}

/// One recorder: mode selection, capture wiring, recording and upload
pub struct Recorder {
    sources: CaptureSources,
    controller: RecordingController,
    uploader: UploadCoordinator,
    mode: VideoType,
    quality: QualityTier,
    cameras: Vec<CameraInfo>,
    selected_camera: Option<String>,
    preview: Option<Preview>,
}

impl Recorder {
    /// Create a recorder. Cameras are enumerated once, here.
    pub async fn new(
        sources: CaptureSources,
        encoders: EncoderFactory,
        uploader: UploadCoordinator,
    ) -> Self {
        let cameras = MediaCaptureSession::new(sources.clone())
            .enumerate_cameras()
            .await;
        let selected_camera = cameras.first().map(|c| c.id.clone());
        tracing::info!("Recorder ready with {} camera(s)", cameras.len());

        Self {
            sources,
            controller: RecordingController::new(encoders),
            uploader,
            mode: VideoType::Screen,
            quality: QualityTier::default(),
            cameras,
            selected_camera,
            preview: None,
        }
    }

    pub fn state(&self) -> RecordingState {
        self.controller.state()
    }

    pub fn mode(&self) -> VideoType {
        self.mode
    }

    pub fn cameras(&self) -> &[CameraInfo] {
        &self.cameras
    }

    pub fn controller(&self) -> &RecordingController {
        &self.controller
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.controller.subscribe()
    }

    pub fn status(&self) -> RecorderStatus {
        RecorderStatus {
            state: self.controller.state(),
            mode: self.mode,
            quality: self.quality,
            elapsed: self.controller.elapsed_secs(),
            camera_id: self.selected_camera.clone(),
            previewing: self.preview.is_some(),
            artifact: self.controller.artifact().map(ArtifactInfo::from),
        }
    }

    fn ensure_idle(&self, action: &'static str) -> RecordingResult<()> {
        match self.controller.state() {
            RecordingState::Idle => Ok(()),
            from => Err(RecordingError::InvalidTransition { from, action }),
        }
    }

    pub fn set_mode(&mut self, mode: VideoType) -> RecordingResult<()> {
        self.ensure_idle("change mode")?;
        if mode != self.mode && self.mode == VideoType::Webcam {
            self.stop_preview();
        }
        self.mode = mode;
        Ok(())
    }

    pub fn set_quality(&mut self, quality: QualityTier) -> RecordingResult<()> {
        self.ensure_idle("change quality")?;
        self.quality = quality;
        Ok(())
    }

    /// Select a camera by id. In webcam mode the preview follows the selection.
    pub async fn select_camera(&mut self, id: &str) -> RecordingResult<()> {
        self.ensure_idle("change camera")?;
        if !self.cameras.iter().any(|c| c.id == id) {
            return Err(CaptureError::DeviceUnavailable(format!("Unknown camera {id}")).into());
        }
        if self.selected_camera.as_deref() == Some(id) {
            return Ok(());
        }

        self.selected_camera = Some(id.to_string());
        self.stop_preview();
        if self.mode == VideoType::Webcam {
            self.start_preview().await?;
        }
        Ok(())
    }

    /// Open the selected camera (with microphone) for previewing. Without a
    /// selected camera this does nothing.
    pub async fn start_preview(&mut self) -> RecordingResult<()> {
        let Some(camera_id) = self.selected_camera.clone() else {
            return Ok(());
        };
        self.stop_preview();

        let mut session = MediaCaptureSession::new(self.sources.clone());
        let config = CameraConfig {
            role: CameraRole::Primary,
            audio: true,
        };
        match session.acquire_camera(Some(&camera_id), &config).await {
            Ok(stream) => {
                self.preview = Some(Preview { session, stream });
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Error starting preview: {}", e);
                Err(e.into())
            }
        }
    }

    /// Latest preview frame source, if previewing
    pub fn preview_stream(&self) -> Option<&CaptureStream> {
        self.preview.as_ref().map(|p| &p.stream)
    }

    fn stop_preview(&mut self) {
        if let Some(mut preview) = self.preview.take() {
            preview.session.release();
        }
    }

    async fn acquire_source(&mut self) -> Result<(RecordingSource, RecordingOptions), CaptureError> {
        match self.mode {
            VideoType::Screen => {
                let mut session = MediaCaptureSession::new(self.sources.clone());
                let display = session.acquire_display(&DisplayConfig::new(self.quality)).await?;
                let options = RecordingOptions {
                    mode: VideoType::Screen,
                    quality: self.quality.into(),
                };
                Ok((RecordingSource::new(session, display), options))
            }
            VideoType::Webcam => {
                if self.selected_camera.is_none() {
                    return Err(CaptureError::DeviceUnavailable("No camera selected".to_string()));
                }
                if self.preview.is_none() {
                    self.start_preview().await.map_err(|e| match e {
                        RecordingError::Capture(e) => e,
                        other => CaptureError::Backend(other.to_string()),
                    })?;
                }
                let preview = self
                    .preview
                    .take()
                    .ok_or_else(|| CaptureError::DeviceUnavailable("No camera preview".to_string()))?;
                let options = RecordingOptions {
                    mode: VideoType::Webcam,
                    quality: VideoQuality::Standard,
                };
                Ok((RecordingSource::new(preview.session, preview.stream), options))
            }
            VideoType::Combined => {
                let mut session = MediaCaptureSession::new(self.sources.clone());
                let display = session.acquire_display(&DisplayConfig::new(self.quality)).await?;
                let camera = session
                    .acquire_camera(
                        self.selected_camera.as_deref(),
                        &CameraConfig {
                            role: CameraRole::Overlay,
                            audio: false,
                        },
                    )
                    .await?;

                let (compositor, output) =
                    FrameCompositor::new(self.quality.resolution()).start(&display, &camera);
                let options = RecordingOptions {
                    mode: VideoType::Combined,
                    quality: self.quality.into(),
                };
                Ok((RecordingSource::composited(session, compositor, output), options))
            }
        }
    }

    /// Acquire sources for the current mode and start recording.
    ///
    /// Any failure releases whatever was acquired, leaves the recorder idle
    /// and emits an error notice.
    pub async fn start_recording(&mut self) -> RecordingResult<()> {
        match self.controller.state() {
            RecordingState::Idle => {}
            RecordingState::Recording => {
                tracing::debug!("Already recording");
                return Ok(());
            }
            from => {
                return Err(RecordingError::InvalidTransition {
                    from,
                    action: "start",
                })
            }
        }

        let (source, options) = match self.acquire_source().await {
            Ok(acquired) => acquired,
            Err(e) => {
                tracing::warn!("Failed to acquire {} capture: {}", self.mode, e);
                self.controller.notify(Notice::error("Error", START_FAILED));
                return Err(e.into());
            }
        };

        if let Err(e) = self.controller.start(source, options).await {
            self.controller.notify(Notice::error("Error", START_FAILED));
            return Err(e);
        }

        self.controller.notify(started_notice(options.mode));
        Ok(())
    }

    /// Stop recording and finalize the artifact
    pub async fn stop_recording(&mut self) -> RecordingResult<ArtifactInfo> {
        let artifact = self.controller.stop().await?;
        self.controller
            .notify(Notice::info("Recording stopped", "Your recording is ready"));
        Ok(ArtifactInfo::from(&artifact))
    }

    /// Drop the finished recording. In webcam mode the preview comes back.
    pub async fn discard(&mut self) -> RecordingResult<bool> {
        let discarded = self.controller.discard()?;
        if discarded {
            self.resume_preview().await;
        }
        Ok(discarded)
    }

    async fn resume_preview(&mut self) {
        if self.mode == VideoType::Webcam && self.preview.is_none() {
            if let Err(e) = self.start_preview().await {
                tracing::warn!("Preview did not restart: {}", e);
            }
        }
    }

    /// Upload the finished recording. On success the artifact is consumed;
    /// on failure it is kept so the user can try again.
    pub async fn upload(&mut self) -> RecordingResult<VideoRecord> {
        let artifact = match (self.controller.state(), self.controller.artifact()) {
            (RecordingState::Stopped, Some(artifact)) => artifact.clone(),
            (from, _) => {
                return Err(RecordingError::InvalidTransition {
                    from,
                    action: "upload",
                })
            }
        };

        match self.uploader.upload(&artifact).await {
            Ok(record) => {
                self.controller
                    .notify(Notice::info("Upload successful", "Your video has been saved"));
                self.controller.take_artifact()?;
                self.resume_preview().await;
                Ok(record)
            }
            Err(e) => {
                tracing::error!("Upload failed: {}", e);
                self.controller.notify(Notice::error(
                    "Upload failed",
                    "Failed to upload video. Please try again.",
                ));
                Err(e.into())
            }
        }
    }

    /// Write the finished recording into `dir` under its download name
    pub async fn save_artifact(&self, dir: &Path) -> RecordingResult<PathBuf> {
        let artifact = self.controller.artifact().ok_or(RecordingError::InvalidTransition {
            from: self.controller.state(),
            action: "save the artifact",
        })?;

        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(artifact.file_name());
        tokio::fs::write(&path, &artifact.bytes).await?;
        tracing::info!("Saved recording to {}", path.display());
        Ok(path)
    }

    /// Stop any recording and close the preview
    pub async fn shutdown(&mut self) {
        if self.controller.state() == RecordingState::Recording {
            if let Err(e) = self.controller.stop().await {
                tracing::warn!("Stopping recording on shutdown: {}", e);
            }
        }
        self.stop_preview();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{SyntheticCamera, SyntheticDisplay};
    use crate::recorder::encoder::{FrameLogEncoder, MediaEncoder};
    use crate::recorder::state::NoticeLevel;
    use std::sync::Arc;
    use std::time::Duration;

    async fn recorder(display: SyntheticDisplay, camera: SyntheticCamera) -> Recorder {
        let sources = CaptureSources::new(Arc::new(display), Arc::new(camera));
        let encoders: EncoderFactory =
            Arc::new(|| Box::new(FrameLogEncoder::new()) as Box<dyn MediaEncoder>);
        // Nothing listens on port 1
        let uploader = UploadCoordinator::new("http://127.0.0.1:1").unwrap();
        Recorder::new(sources, encoders, uploader).await
    }

    fn notices(events: &mut broadcast::Receiver<RecordingEvent>) -> Vec<Notice> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let RecordingEvent::Notice(notice) = event {
                out.push(notice);
            }
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn screen_recording_round_trip() {
        let mut recorder = recorder(SyntheticDisplay::new(), SyntheticCamera::default()).await;
        let mut events = recorder.subscribe();
        recorder.set_quality(QualityTier::Low).unwrap();

        recorder.start_recording().await.unwrap();
        assert!(recorder.set_quality(QualityTier::High).is_err());
        tokio::time::sleep(Duration::from_millis(2100)).await;

        let info = recorder.stop_recording().await.unwrap();
        assert_eq!(info.duration, 2);
        assert!(info.file_name.starts_with("screen-recording-"));

        let notices = notices(&mut events);
        let titles: Vec<_> = notices.iter().map(|n| n.title.as_str()).collect();
        assert_eq!(titles, vec!["Recording started", "Recording stopped"]);
        assert_eq!(notices[0].description, "Your screen is being recorded");
    }

    #[tokio::test]
    async fn denied_permission_stays_idle_with_notice() {
        let mut recorder =
            recorder(SyntheticDisplay::new().deny_permission(), SyntheticCamera::default()).await;
        let mut events = recorder.subscribe();

        let err = recorder.start_recording().await.unwrap_err();
        assert!(matches!(err, RecordingError::Capture(CaptureError::PermissionDenied(_))));
        assert_eq!(recorder.state(), RecordingState::Idle);

        let notices = notices(&mut events);
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].level, NoticeLevel::Error);
        assert_eq!(notices[0].description, START_FAILED);
    }

    #[tokio::test]
    async fn webcam_mode_records_from_preview_as_standard() {
        let mut recorder = recorder(SyntheticDisplay::new(), SyntheticCamera::default()).await;
        recorder.set_mode(VideoType::Webcam).unwrap();
        recorder.start_preview().await.unwrap();
        let preview = recorder.preview_stream().unwrap().clone();

        recorder.start_recording().await.unwrap();
        assert_eq!(recorder.controller().options().unwrap().quality, VideoQuality::Standard);
        assert!(recorder.preview_stream().is_none());

        recorder.stop_recording().await.unwrap();
        assert!(!preview.is_active());

        recorder.discard().await.unwrap();
        assert!(recorder.status().previewing);
        recorder.shutdown().await;
        assert!(!recorder.status().previewing);
    }

    #[tokio::test]
    async fn webcam_mode_without_cameras_fails() {
        let mut recorder = recorder(SyntheticDisplay::new(), SyntheticCamera::new(Vec::new())).await;
        assert!(recorder.cameras().is_empty());
        recorder.set_mode(VideoType::Webcam).unwrap();

        let err = recorder.start_recording().await.unwrap_err();
        assert!(matches!(err, RecordingError::Capture(CaptureError::DeviceUnavailable(_))));
        assert_eq!(recorder.state(), RecordingState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn combined_mode_composites_at_tier_resolution() {
        let mut recorder = recorder(SyntheticDisplay::new(), SyntheticCamera::default()).await;
        recorder.set_mode(VideoType::Combined).unwrap();
        recorder.set_quality(QualityTier::Low).unwrap();

        recorder.start_recording().await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        let info = recorder.stop_recording().await.unwrap();

        let log = crate::recorder::encoder::FrameLog::parse(
            &recorder.controller().artifact().unwrap().bytes,
        )
        .unwrap();
        assert_eq!(log.resolution, QualityTier::Low.resolution());
        assert!(info.file_name.starts_with("combined-recording-"));
    }

    #[tokio::test]
    async fn failed_upload_keeps_artifact() {
        let mut recorder = recorder(SyntheticDisplay::new(), SyntheticCamera::default()).await;
        let mut events = recorder.subscribe();
        assert!(matches!(
            recorder.upload().await,
            Err(RecordingError::InvalidTransition { .. })
        ));

        recorder.start_recording().await.unwrap();
        recorder.stop_recording().await.unwrap();

        assert!(matches!(recorder.upload().await, Err(RecordingError::Upload(_))));
        assert_eq!(recorder.state(), RecordingState::Stopped);
        assert!(recorder.status().artifact.is_some());

        let last = notices(&mut events).pop().unwrap();
        assert_eq!(last.title, "Upload failed");
    }

    #[tokio::test]
    async fn artifact_saves_under_download_name() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut recorder = recorder(SyntheticDisplay::new(), SyntheticCamera::default()).await;
        assert!(recorder.save_artifact(dir.path()).await.is_err());

        recorder.start_recording().await.unwrap();
        recorder.stop_recording().await.unwrap();

        let path = recorder.save_artifact(dir.path()).await.unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("screen-recording-") && name.ends_with(".framelog"));
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
    }

    #[tokio::test]
    async fn camera_selection_is_validated() {
        let cameras = vec![
            CameraInfo { id: "a".to_string(), label: "Front".to_string() },
            CameraInfo { id: "b".to_string(), label: String::new() },
        ];
        let mut recorder = recorder(SyntheticDisplay::new(), SyntheticCamera::new(cameras)).await;
        assert_eq!(recorder.status().camera_id.as_deref(), Some("a"));

        recorder.select_camera("b").await.unwrap();
        assert_eq!(recorder.status().camera_id.as_deref(), Some("b"));
        assert!(recorder.select_camera("zzz").await.is_err());
    }
}
