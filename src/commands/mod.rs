//! HTTP command handlers
//!
//! Each submodule contributes its routes; `router` merges them over one
//! shared `AppState`.

pub mod analytics;
pub mod objects;
pub mod recording;
pub mod videos;

use crate::recorder::Recorder;
use crate::storage::{LocalSigner, ObjectPaths, ObjectStore, UrlSigner};
use crate::store::VideoStore;
use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Largest accepted request body (uploads through the local storage route)
pub const MAX_UPLOAD_SIZE: usize = 500 * 1024 * 1024;

/// Shared state of the HTTP surface
pub struct AppState {
    pub videos: VideoStore,
    pub paths: ObjectPaths,
    /// Issues upload URLs
    pub signer: Arc<dyn UrlSigner>,
    pub objects: Arc<dyn ObjectStore>,
    /// Verifies uploads to `/storage`; only set for local disk storage
    pub local_signer: Option<LocalSigner>,
    pub recorder: Mutex<Recorder>,
}

/// Build all routes
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(videos::routes())
        .merge(objects::routes())
        .merge(analytics::routes())
        .merge(recording::routes())
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_SIZE))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::capture::{CaptureSources, SyntheticCamera, SyntheticDisplay};
    use crate::recorder::{EncoderFactory, FrameLogEncoder, MediaEncoder};
    use crate::storage::LocalObjectStore;
    use crate::upload::UploadCoordinator;
    use tempfile::TempDir;

    pub const PRIVATE_DIR: &str = "/bucket/.private";

    /// State over temp directories with local storage and synthetic capture
    pub async fn state(dir: &TempDir) -> Arc<AppState> {
        let local_signer = LocalSigner::new(b"test-secret".to_vec(), "http://localhost:5000/storage");
        let paths = ObjectPaths::new(Some(PRIVATE_DIR.to_string())).with_origin(local_signer.base_url());
        let encoders: EncoderFactory =
            Arc::new(|| Box::new(FrameLogEncoder::new()) as Box<dyn MediaEncoder>);
        let sources = CaptureSources::new(
            Arc::new(SyntheticDisplay::new()),
            Arc::new(SyntheticCamera::default()),
        );
        let recorder = Recorder::new(
            sources,
            encoders,
            UploadCoordinator::with_client("http://127.0.0.1:1", reqwest::Client::new()),
        )
        .await;

        Arc::new(AppState {
            videos: VideoStore::new(dir.path().join("data")),
            paths,
            signer: Arc::new(local_signer.clone()),
            objects: Arc::new(LocalObjectStore::new(dir.path().join("objects"))),
            local_signer: Some(local_signer),
            recorder: Mutex::new(recorder),
        })
    }

    pub async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }
}
