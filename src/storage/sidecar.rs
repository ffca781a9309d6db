//! Remote object storage reached through a signing sidecar
//!
//! The sidecar turns `(bucket, object, method, expiry)` into a signed URL on
//! the storage service. Reads and writes are plain HTTP against such URLs.

use super::{
    ByteRange, ObjectBody, ObjectLocation, ObjectMeta, ObjectStore, SignedMethod, StorageError,
    StorageResult, UrlSigner,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, RANGE};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Default sidecar address
pub const DEFAULT_SIDECAR_ENDPOINT: &str = "http://127.0.0.1:1106";

/// Lifetime of URLs the remote store signs for its own reads and writes
const INTERNAL_URL_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Serialize)]
struct SignRequest<'a> {
    bucket_name: &'a str,
    object_name: &'a str,
    method: SignedMethod,
    expires_at: String,
}

#[derive(Debug, Deserialize)]
struct SignResponse {
    signed_url: String,
}

/// Client of the sidecar's `POST /object-storage/signed-object-url`
#[derive(Debug, Clone)]
pub struct SidecarSigner {
    endpoint: String,
    http: Client,
}

impl SidecarSigner {
    pub fn new(endpoint: impl Into<String>, http: Client) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            http,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl UrlSigner for SidecarSigner {
    async fn sign(
        &self,
        location: &ObjectLocation,
        method: SignedMethod,
        ttl: Duration,
    ) -> StorageResult<String> {
        let ttl = chrono::Duration::from_std(ttl).map_err(|e| StorageError::Signing(e.to_string()))?;
        let request = SignRequest {
            bucket_name: &location.bucket,
            object_name: &location.name,
            method,
            expires_at: (chrono::Utc::now() + ttl).to_rfc3339(),
        };

        let url = format!("{}/object-storage/signed-object-url", self.endpoint);
        let response = self.http.post(url).json(&request).send().await?;
        if !response.status().is_success() {
            return Err(StorageError::Signing(format!(
                "Failed to sign object URL, errorcode: {}",
                response.status().as_u16()
            )));
        }

        let SignResponse { signed_url } = response.json().await?;
        Ok(signed_url)
    }
}

/// Object store whose reads and writes go through sidecar-signed URLs
#[derive(Clone)]
pub struct SidecarObjectStore {
    signer: Arc<dyn UrlSigner>,
    http: Client,
}

impl SidecarObjectStore {
    pub fn new(signer: Arc<dyn UrlSigner>, http: Client) -> Self {
        Self { signer, http }
    }
}

fn backend_error(step: &str, status: StatusCode) -> StorageError {
    StorageError::Backend(format!("{step} returned {status}"))
}

#[async_trait]
impl ObjectStore for SidecarObjectStore {
    async fn head(&self, location: &ObjectLocation) -> StorageResult<Option<ObjectMeta>> {
        let url = self.signer.sign(location, SignedMethod::Head, INTERNAL_URL_TTL).await?;
        let response = self.http.head(url).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let headers = response.headers();
                let size = headers
                    .get(CONTENT_LENGTH)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0);
                let content_type = headers
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                Ok(Some(ObjectMeta { size, content_type }))
            }
            status => Err(backend_error("HEAD", status)),
        }
    }

    async fn read(
        &self,
        location: &ObjectLocation,
        range: Option<ByteRange>,
    ) -> StorageResult<ObjectBody> {
        let url = self.signer.sign(location, SignedMethod::Get, INTERNAL_URL_TTL).await?;
        let mut request = self.http.get(url);
        if let Some(range) = range {
            request = request.header(RANGE, format!("bytes={}-{}", range.start, range.end));
        }

        let response = request.send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(StorageError::NotFound(location.path())),
            status if status.is_success() => Ok(response
                .bytes_stream()
                .map_err(std::io::Error::other)
                .boxed()),
            status => Err(backend_error("GET", status)),
        }
    }

    async fn write(
        &self,
        location: &ObjectLocation,
        content_type: Option<&str>,
        bytes: Bytes,
    ) -> StorageResult<ObjectMeta> {
        let url = self.signer.sign(location, SignedMethod::Put, INTERNAL_URL_TTL).await?;
        let size = bytes.len() as u64;
        let mut request = self.http.put(url).body(bytes);
        if let Some(content_type) = content_type {
            request = request.header(CONTENT_TYPE, content_type);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(backend_error("PUT", response.status()));
        }
        Ok(ObjectMeta {
            size,
            content_type: content_type.map(str::to_string),
        })
    }
}
