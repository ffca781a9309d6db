//! Upload coordinator
//!
//! Client side of persisting a finished recording: request a signed write
//! URL, PUT the artifact to it, then register the video's metadata. Nothing is
//! retried; the first failure is returned to the caller.

use crate::recorder::Artifact;
use crate::store::{NewVideo, VideoRecord};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while uploading a recording
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{step} returned {status}: {body}")]
    UnexpectedStatus {
        step: &'static str,
        status: StatusCode,
        body: String,
    },
}

pub type UploadResult<T> = Result<T, UploadError>;

/// Response of `POST /api/videos/upload`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadUrl {
    #[serde(rename = "uploadURL")]
    pub upload_url: String,
}

/// Talks to the HTTP surface to persist recordings
#[derive(Debug, Clone)]
pub struct UploadCoordinator {
    base_url: String,
    http: Client,
}

impl UploadCoordinator {
    /// Create a coordinator targeting the server at `base_url`
    pub fn new(base_url: impl Into<String>) -> UploadResult<Self> {
        let http = Client::builder().timeout(Duration::from_secs(300)).build()?;
        Ok(Self::with_client(base_url, http))
    }

    pub fn with_client(base_url: impl Into<String>, http: Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn check(step: &'static str, response: Response) -> UploadResult<Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(UploadError::UnexpectedStatus { step, status, body })
    }

    /// Ask the server for a short-lived signed write URL for an object of
    /// the given content type
    pub async fn request_upload_url(&self, content_type: &str) -> UploadResult<String> {
        let url = upload_url_request(&self.base_url, content_type);
        let response = self.http.post(url).send().await?;
        let UploadUrl { upload_url } = Self::check("upload URL request", response)
            .await?
            .json()
            .await?;
        Ok(upload_url)
    }

    /// PUT the artifact bytes to a signed URL
    pub async fn put_artifact(&self, upload_url: &str, artifact: &Artifact) -> UploadResult<()> {
        let response = self
            .http
            .put(upload_url)
            .header(CONTENT_TYPE, artifact.mime_type.as_str())
            .body(artifact.bytes.clone())
            .send()
            .await?;
        Self::check("object upload", response).await?;
        Ok(())
    }

    /// Register an uploaded object with the metadata store
    pub async fn register(&self, upload_url: &str, artifact: &Artifact) -> UploadResult<VideoRecord> {
        let url = format!("{}/api/videos", self.base_url);
        let body = NewVideo {
            video_url: strip_query(upload_url).to_string(),
            duration: artifact.duration_secs,
            kind: artifact.mode,
            quality: artifact.quality,
        };
        let response = self.http.post(url).json(&body).send().await?;
        let record = Self::check("video registration", response).await?.json().await?;
        Ok(record)
    }

    /// Run the whole upload: signed URL, PUT, register
    pub async fn upload(&self, artifact: &Artifact) -> UploadResult<VideoRecord> {
        let upload_url = self.request_upload_url(&artifact.mime_type).await?;
        tracing::debug!("Uploading {} bytes to {}", artifact.len(), strip_query(&upload_url));

        self.put_artifact(&upload_url, artifact).await?;
        let record = self.register(&upload_url, artifact).await?;

        tracing::info!("Uploaded {} as video {}", artifact.file_name(), record.id);
        Ok(record)
    }
}

fn upload_url_request(base_url: &str, content_type: &str) -> String {
    if content_type.is_empty() {
        return format!("{base_url}/api/videos/upload");
    }
    format!(
        "{base_url}/api/videos/upload?contentType={}",
        urlencoding::encode(content_type)
    )
}

/// The URL without its query string
pub fn strip_query(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}
