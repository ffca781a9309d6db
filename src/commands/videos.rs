//! Video metadata endpoints (/api/videos/*)

use super::AppState;
use crate::storage::{SignedMethod, StorageError, UPLOAD_URL_TTL};
use crate::store::{NewVideo, RecordDraft, VideoCollection, VideoRecord};
use crate::upload::UploadUrl;
use crate::utils::{AppError, AppResult, LogErr};
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/videos", get(list_videos).post(create_video))
        .route("/api/videos/upload", post(create_upload_url))
        .route("/api/videos/{id}", delete(delete_video))
        .route("/api/videos/{id}/view", post(record_view))
}

/// GET /api/videos - All videos, newest first
async fn list_videos(State(state): State<Arc<AppState>>) -> Json<VideoCollection> {
    Json(VideoCollection {
        videos: state.videos.list().await,
    })
}

/// POST /api/videos - Register an uploaded video
async fn create_video(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> AppResult<Json<VideoRecord>> {
    let new: NewVideo = serde_json::from_slice(&body).log_500("Invalid video body", "Failed to save video")?;

    let record = state
        .videos
        .create(RecordDraft {
            video_path: state.paths.normalize_public_url(&new.video_url),
            duration: new.duration,
            kind: new.kind,
            quality: new.quality,
        })
        .await
        .log_500("Error saving video", "Failed to save video")?;

    Ok(Json(record))
}

/// DELETE /api/videos/{id} - Succeeds whether or not the video exists
async fn delete_video(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    state
        .videos
        .delete(&id)
        .await
        .log_500("Error deleting video", "Failed to delete video")?;
    Ok(Json(json!({ "success": true })))
}

/// POST /api/videos/{id}/view - Count one view
async fn record_view(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<VideoRecord>> {
    state
        .videos
        .increment_views(&id)
        .await
        .log_500("Error recording view", "Failed to record view")?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("Video not found".to_string()))
}

/// Query of `POST /api/videos/upload`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadQuery {
    /// Media type of the recording; picks the object's extension
    content_type: Option<String>,
}

/// POST /api/videos/upload - Signed URL for uploading one recording
async fn create_upload_url(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UploadQuery>,
) -> AppResult<Json<UploadUrl>> {
    let content_type = query.content_type.as_deref();
    let location = state.paths.new_upload_location(content_type).map_err(|e| match e {
        StorageError::Unavailable => AppError::StorageUnavailable,
        other => AppError::Storage(other),
    })?;

    let upload_url = state
        .signer
        .sign(&location, SignedMethod::Put, UPLOAD_URL_TTL)
        .await
        .log_500("Error generating upload URL", "Failed to generate upload URL")?;

    tracing::debug!("Issued upload URL for {}", location);
    Ok(Json(UploadUrl { upload_url }))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{body_json, state};
    use super::super::router;
    use super::*;
    use crate::capture::{CaptureSources, SyntheticCamera, SyntheticDisplay};
    use crate::recorder::{FrameLogEncoder, MediaEncoder, Recorder};
    use crate::storage::{LocalObjectStore, LocalSigner, ObjectPaths};
    use crate::store::VideoStore;
    use crate::upload::UploadCoordinator;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tokio::sync::Mutex;
    use tower::ServiceExt;

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn create_normalizes_path_and_lists_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(state(&dir).await);

        for name in ["a", "b"] {
            let response = app
                .clone()
                .oneshot(post_json(
                    "/api/videos",
                    json!({
                        "videoURL": format!("https://storage.googleapis.com/bucket/.private/videos/{name}.webm?X-Goog-Signature=abc"),
                        "duration": 42,
                        "type": "webcam",
                        "quality": "standard",
                    }),
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let created = body_json(response).await;
            assert_eq!(created["videoPath"], format!("/objects/videos/{name}.webm"));
            assert_eq!(created["views"], 0);
        }

        let response = app
            .oneshot(Request::get("/api/videos").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let listed = body_json(response).await;
        let videos = listed["videos"].as_array().unwrap();
        assert_eq!(videos.len(), 2);
        assert_eq!(videos[0]["videoPath"], "/objects/videos/b.webm");
    }

    #[tokio::test]
    async fn malformed_body_fails_to_save() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(state(&dir).await);

        let response = app
            .oneshot(post_json("/api/videos", json!({ "duration": "long" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await["error"], "Failed to save video");
    }

    #[tokio::test]
    async fn delete_absent_video_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(state(&dir).await);

        let response = app
            .oneshot(Request::delete("/api/videos/123").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({ "success": true }));
        assert!(!dir.path().join("data/videos.json").exists());
    }

    #[tokio::test]
    async fn views_are_counted() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir).await;
        let record = state
            .videos
            .create(RecordDraft {
                video_path: "/objects/videos/a.webm".to_string(),
                duration: 3,
                kind: crate::store::VideoType::Screen,
                quality: crate::store::VideoQuality::High,
            })
            .await
            .unwrap();
        let app = router(state);

        let uri = format!("/api/videos/{}/view", record.id);
        let response = app
            .clone()
            .oneshot(Request::post(uri.as_str()).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_json(response).await["views"], 1);

        let response = app
            .oneshot(Request::post("/api/videos/missing/view").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn upload_url_is_signed_for_the_private_dir() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(state(&dir).await);

        let response = app
            .oneshot(Request::post("/api/videos/upload").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let url = body_json(response).await["uploadURL"].as_str().unwrap().to_string();
        assert!(url.starts_with("http://localhost:5000/storage/bucket/.private/videos/"));
        assert!(url.contains(".webm?expires="));
        assert!(url.contains("&signature="));
    }

    #[tokio::test]
    async fn upload_url_extension_follows_content_type() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(state(&dir).await);

        let response = app
            .oneshot(
                Request::post("/api/videos/upload?contentType=application%2Fx-frame-log")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let url = body_json(response).await["uploadURL"].as_str().unwrap().to_string();
        assert!(url.contains(".framelog?expires="), "{url}");
    }

    #[tokio::test]
    async fn upload_url_without_private_dir() {
        let dir = tempfile::tempdir().unwrap();
        let signer = LocalSigner::new(b"k".to_vec(), "http://localhost:5000/storage");
        let recorder = Recorder::new(
            CaptureSources::new(Arc::new(SyntheticDisplay::new()), Arc::new(SyntheticCamera::default())),
            Arc::new(|| Box::new(FrameLogEncoder::new()) as Box<dyn MediaEncoder>),
            UploadCoordinator::with_client("http://127.0.0.1:1", reqwest::Client::new()),
        )
        .await;
        let state = Arc::new(AppState {
            videos: VideoStore::new(dir.path()),
            paths: ObjectPaths::new(None),
            signer: Arc::new(signer.clone()),
            objects: Arc::new(LocalObjectStore::new(dir.path())),
            local_signer: Some(signer),
            recorder: Mutex::new(recorder),
        });

        let response = router(state)
            .oneshot(Request::post("/api/videos/upload").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await["error"], "Object storage not configured");
    }
}
