//! Recorder control endpoints (/api/recorder/*)

use super::AppState;
use crate::capture::{CameraInfo, QualityTier};
use crate::recorder::{ArtifactInfo, RecorderStatus};
use crate::store::{VideoRecord, VideoType};
use crate::utils::{AppError, AppResult};
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/recorder", get(get_recording_state))
        .route("/api/recorder/cameras", get(get_cameras))
        .route("/api/recorder/start", post(start_recording))
        .route("/api/recorder/stop", post(stop_recording))
        .route("/api/recorder/discard", post(discard_recording))
        .route("/api/recorder/upload", post(upload_recording))
        .route("/api/recorder/artifact", get(download_artifact))
}

/// Body of `POST /api/recorder/start`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    pub mode: VideoType,
    pub quality: Option<QualityTier>,
    pub camera_id: Option<String>,
}

/// GET /api/recorder - Current state, elapsed time and settings
async fn get_recording_state(State(state): State<Arc<AppState>>) -> Json<RecorderStatus> {
    Json(state.recorder.lock().await.status())
}

/// GET /api/recorder/cameras - Cameras found when the recorder was created
async fn get_cameras(State(state): State<Arc<AppState>>) -> Json<Vec<CameraInfo>> {
    Json(state.recorder.lock().await.cameras().to_vec())
}

/// POST /api/recorder/start - Apply settings and start recording
async fn start_recording(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StartRequest>,
) -> AppResult<Json<RecorderStatus>> {
    let mut recorder = state.recorder.lock().await;

    if recorder.state() == crate::recorder::RecordingState::Idle {
        recorder.set_mode(request.mode)?;
        if let Some(quality) = request.quality {
            recorder.set_quality(quality)?;
        }
        if let Some(camera_id) = &request.camera_id {
            recorder.select_camera(camera_id).await?;
        }
    }

    recorder.start_recording().await?;
    Ok(Json(recorder.status()))
}

/// POST /api/recorder/stop - Stop and finalize the artifact
async fn stop_recording(State(state): State<Arc<AppState>>) -> AppResult<Json<ArtifactInfo>> {
    let info = state.recorder.lock().await.stop_recording().await?;
    Ok(Json(info))
}

/// POST /api/recorder/discard - Drop the finished artifact
async fn discard_recording(State(state): State<Arc<AppState>>) -> AppResult<Json<Value>> {
    let discarded = state.recorder.lock().await.discard().await?;
    Ok(Json(json!({ "discarded": discarded })))
}

/// POST /api/recorder/upload - Upload the finished artifact and register it
async fn upload_recording(State(state): State<Arc<AppState>>) -> AppResult<Json<VideoRecord>> {
    let record = state.recorder.lock().await.upload().await?;
    Ok(Json(record))
}

/// GET /api/recorder/artifact - Download the finished artifact
async fn download_artifact(State(state): State<Arc<AppState>>) -> AppResult<Response> {
    let recorder = state.recorder.lock().await;
    let artifact = recorder
        .controller()
        .artifact()
        .ok_or_else(|| AppError::NotFound("No finished recording".to_string()))?;

    Ok((
        [
            (header::CONTENT_TYPE, artifact.mime_type.clone()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", artifact.file_name()),
            ),
        ],
        artifact.bytes.clone(),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::super::router;
    use super::super::test_support::{body_json, state};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::json;
    use tower::ServiceExt;

    fn post(uri: &str, body: Option<serde_json::Value>) -> Request<Body> {
        let builder = Request::post(uri);
        match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    #[tokio::test]
    async fn record_stop_download_discard() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(state(&dir).await);

        let response = app
            .clone()
            .oneshot(post("/api/recorder/start", Some(json!({ "mode": "screen", "quality": "low" }))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let status = body_json(response).await;
        assert_eq!(status["state"], "recording");
        assert_eq!(status["quality"], "low");

        let response = app.clone().oneshot(post("/api/recorder/stop", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let info = body_json(response).await;
        assert!(info["fileName"].as_str().unwrap().starts_with("screen-recording-"));

        let response = app
            .clone()
            .oneshot(Request::get("/api/recorder/artifact").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let disposition = response.headers()["content-disposition"].to_str().unwrap().to_string();
        assert!(disposition.starts_with("attachment; filename=\"screen-recording-"));

        let response = app.clone().oneshot(post("/api/recorder/discard", None)).await.unwrap();
        assert_eq!(body_json(response).await["discarded"], true);

        let response = app
            .oneshot(Request::get("/api/recorder").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_json(response).await["state"], "idle");
    }

    #[tokio::test]
    async fn stop_while_idle_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let response = router(state(&dir).await)
            .oneshot(post("/api/recorder/stop", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(response).await["code"], "NOT_RECORDING");
    }

    #[tokio::test]
    async fn cameras_are_listed() {
        let dir = tempfile::tempdir().unwrap();
        let response = router(state(&dir).await)
            .oneshot(Request::get("/api/recorder/cameras").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let cameras = body_json(response).await;
        assert_eq!(cameras[0]["id"], "synthetic-0");
    }

    #[tokio::test]
    async fn unknown_camera_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let response = router(state(&dir).await)
            .oneshot(post(
                "/api/recorder/start",
                Some(json!({ "mode": "webcam", "cameraId": "nope" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(response).await["code"], "DEVICE_UNAVAILABLE");
    }
}
