//! Object endpoints: public byte-range reads (/objects/*) and signed local
//! uploads (/storage/*)

use super::AppState;
use crate::storage::{parse_range, ObjectLocation, RangeRequest, SignedMethod, StorageError};
use crate::utils::{AppError, AppResult};
use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::Router;
use serde::Deserialize;
use std::sync::Arc;

const DEFAULT_CONTENT_TYPE: &str = "video/webm";
const CACHE_CONTROL: &str = "public, max-age=3600";

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/objects/{*path}", get(serve_object))
        .route("/storage/{bucket}/{*object}", put(upload_object))
}

fn file_not_found() -> AppError {
    AppError::NotFound("File not found".to_string())
}

/// GET /objects/{*path} - Serve `{PRIVATE_OBJECT_DIR}/{path}`, honoring `Range`
async fn serve_object(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> AppResult<Response> {
    let location = state.paths.resolve(&path).map_err(|e| match e {
        StorageError::Unavailable => AppError::StorageUnavailable,
        StorageError::InvalidPath(_) => file_not_found(),
        other => AppError::Storage(other),
    })?;

    let meta = state.objects.head(&location).await?.ok_or_else(file_not_found)?;
    let size = meta.size;
    let content_type = meta
        .content_type
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

    let range = headers.get(header::RANGE).and_then(|v| v.to_str().ok());
    let response = match parse_range(range, size) {
        RangeRequest::Full => {
            let body = state.objects.read(&location, None).await?;
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, content_type),
                    (header::CONTENT_LENGTH, size.to_string()),
                    (header::ACCEPT_RANGES, "bytes".to_string()),
                    (header::CACHE_CONTROL, CACHE_CONTROL.to_string()),
                ],
                Body::from_stream(body),
            )
                .into_response()
        }
        RangeRequest::Partial(range) => {
            let body = state.objects.read(&location, Some(range)).await?;
            (
                StatusCode::PARTIAL_CONTENT,
                [
                    (header::CONTENT_TYPE, content_type),
                    (header::CONTENT_LENGTH, range.len().to_string()),
                    (header::CONTENT_RANGE, range.content_range(size)),
                    (header::ACCEPT_RANGES, "bytes".to_string()),
                    (header::CACHE_CONTROL, CACHE_CONTROL.to_string()),
                ],
                Body::from_stream(body),
            )
                .into_response()
        }
        RangeRequest::Unsatisfiable => (
            StatusCode::RANGE_NOT_SATISFIABLE,
            [
                (header::CONTENT_RANGE, format!("bytes */{size}")),
                (header::ACCEPT_RANGES, "bytes".to_string()),
            ],
        )
            .into_response(),
    };

    Ok(response)
}

#[derive(Debug, Deserialize)]
struct SignedQuery {
    expires: i64,
    signature: String,
}

/// PUT /storage/{bucket}/{*object} - Upload target of locally signed URLs
async fn upload_object(
    State(state): State<Arc<AppState>>,
    Path((bucket, object)): Path<(String, String)>,
    Query(query): Query<SignedQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<StatusCode> {
    let signer = state
        .local_signer
        .as_ref()
        .ok_or_else(|| AppError::NotFound("Not found".to_string()))?;

    let location = ObjectLocation::parse(&format!("/{bucket}/{object}"))?;
    signer.verify(&location, SignedMethod::Put, query.expires, &query.signature)?;

    let content_type = headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok());
    let meta = state.objects.write(&location, content_type, body).await?;

    tracing::info!("Stored upload {} ({} bytes)", location, meta.size);
    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::super::router;
    use super::super::test_support::{body_json, state, PRIVATE_DIR};
    use super::*;
    use tower::ServiceExt;

    async fn store_object(state: &AppState, path: &str, len: usize) -> Vec<u8> {
        let bytes: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let location = ObjectLocation::parse(&format!("{PRIVATE_DIR}/{path}")).unwrap();
        state
            .objects
            .write(&location, None, Bytes::from(bytes.clone()))
            .await
            .unwrap();
        bytes
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    #[tokio::test]
    async fn range_request_returns_partial_content() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir).await;
        let bytes = store_object(&state, "videos/a.webm", 1000).await;

        let response = router(state)
            .oneshot(
                axum::http::Request::get("/objects/videos/a.webm")
                    .header("range", "bytes=0-99")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        let headers = response.headers();
        assert_eq!(headers["content-range"], "bytes 0-99/1000");
        assert_eq!(headers["content-length"], "100");
        assert_eq!(headers["accept-ranges"], "bytes");
        assert_eq!(headers["content-type"], "video/webm");
        assert_eq!(headers["cache-control"], "public, max-age=3600");
        assert_eq!(body_bytes(response).await, &bytes[..100]);
    }

    #[tokio::test]
    async fn full_response_without_range() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir).await;
        let bytes = store_object(&state, "videos/a.webm", 300).await;

        let response = router(state)
            .oneshot(
                axum::http::Request::get("/objects/videos/a.webm")
                    .header("range", "bytes=garbage")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-length"], "300");
        assert_eq!(body_bytes(response).await, bytes);
    }

    #[tokio::test]
    async fn unsatisfiable_range() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir).await;
        store_object(&state, "videos/a.webm", 10).await;

        let response = router(state)
            .oneshot(
                axum::http::Request::get("/objects/videos/a.webm")
                    .header("range", "bytes=50-")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(response.headers()["content-range"], "bytes */10");
    }

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let response = router(state(&dir).await)
            .oneshot(
                axum::http::Request::get("/objects/videos/none.webm")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"], "File not found");
    }

    #[tokio::test]
    async fn signed_upload_is_stored_and_tampering_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir).await;
        let location = ObjectLocation::parse("/bucket/.private/videos/up.webm").unwrap();
        let url = state
            .signer
            .sign(&location, SignedMethod::Put, std::time::Duration::from_secs(60))
            .await
            .unwrap();
        let path_and_query = url.trim_start_matches("http://localhost:5000").to_string();
        let app = router(state.clone());

        let forged = path_and_query.replace("up.webm", "other.webm");
        let response = app
            .clone()
            .oneshot(
                axum::http::Request::put(forged.as_str())
                    .body(Body::from("evil"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .oneshot(
                axum::http::Request::put(path_and_query.as_str())
                    .header("content-type", "video/webm")
                    .body(Body::from("recording"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let meta = state.objects.head(&location).await.unwrap().unwrap();
        assert_eq!(meta.size, "recording".len() as u64);
    }
}
