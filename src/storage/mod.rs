//! Object storage
//!
//! Objects are addressed as `/{bucket}/{name}`. Uploaded videos live under
//! the private object directory (`PRIVATE_OBJECT_DIR`, itself of the form
//! `/{bucket}/{prefix}`) and are served publicly as `/objects/{rest}`.
//!
//! Two backends:
//! - **Local disk**: objects under `LOCAL_STORAGE_PATH/{bucket}/{name}`,
//!   uploads authorized by HMAC-signed URLs this server verifies
//! - **Sidecar**: a signing sidecar issues signed URLs to remote storage;
//!   reads go through signed GET URLs

pub mod local;
pub mod range;
pub mod sidecar;

pub use local::{LocalObjectStore, LocalSigner};
pub use range::{parse_range, ByteRange, RangeRequest};
pub use sidecar::{SidecarObjectStore, SidecarSigner};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Lifetime of signed upload URLs
pub const UPLOAD_URL_TTL: Duration = Duration::from_secs(900);

/// Origin of remote storage URLs, stripped when registering uploads
pub const REMOTE_STORAGE_ORIGIN: &str = "https://storage.googleapis.com";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Object storage not configured")]
    Unavailable,

    #[error("Invalid object path: {0}")]
    InvalidPath(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// A bucket and an object name within it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectLocation {
    pub bucket: String,
    pub name: String,
}

impl ObjectLocation {
    /// Split `/{bucket}/{name...}`
    pub fn parse(full_path: &str) -> StorageResult<Self> {
        let trimmed = full_path.strip_prefix('/').unwrap_or(full_path);
        let (bucket, name) = trimmed
            .split_once('/')
            .ok_or_else(|| StorageError::InvalidPath(full_path.to_string()))?;

        if bucket.is_empty() || name.is_empty() {
            return Err(StorageError::InvalidPath(full_path.to_string()));
        }
        if full_path.contains('\0') || name.split('/').any(|seg| seg == "..") || bucket == ".." {
            return Err(StorageError::InvalidPath(full_path.to_string()));
        }

        Ok(Self {
            bucket: bucket.to_string(),
            name: name.to_string(),
        })
    }

    pub fn path(&self) -> String {
        format!("/{}/{}", self.bucket, self.name)
    }

    /// The path with each segment percent-encoded, for URLs
    pub fn url_path(&self) -> String {
        let name = self
            .name
            .split('/')
            .map(|seg| urlencoding::encode(seg).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        format!("/{}/{}", urlencoding::encode(&self.bucket), name)
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}", self.bucket, self.name)
    }
}

/// Maps between public `/objects/...` paths, storage URLs and locations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectPaths {
    private_dir: Option<String>,
    origins: Vec<String>,
}

impl ObjectPaths {
    pub fn new(private_dir: Option<String>) -> Self {
        let private_dir = private_dir
            .map(|d| d.trim_end_matches('/').to_string())
            .filter(|d| !d.is_empty());
        Self {
            private_dir,
            origins: vec![REMOTE_STORAGE_ORIGIN.to_string()],
        }
    }

    /// Also strip this URL prefix when normalizing storage URLs
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origins.push(origin.into().trim_end_matches('/').to_string());
        self
    }

    pub fn private_dir(&self) -> Option<&str> {
        self.private_dir.as_deref()
    }

    /// Public `/objects/...` path for a storage URL: origin and query are
    /// dropped, the private directory prefix is removed.
    pub fn normalize_public_url(&self, url: &str) -> String {
        let mut path = url.to_string();
        for origin in &self.origins {
            if path.starts_with(origin.as_str()) {
                path = path.replacen(origin.as_str(), "", 1);
                break;
            }
        }
        let path = crate::upload::strip_query(&path);
        let path = match &self.private_dir {
            Some(dir) => path.replacen(dir.as_str(), "", 1),
            None => path.to_string(),
        };
        format!("/objects{path}")
    }

    /// Location of `{private_dir}/{path}`, where `path` comes from `/objects/{path}`
    pub fn resolve(&self, path: &str) -> StorageResult<ObjectLocation> {
        let dir = self.private_dir.as_ref().ok_or(StorageError::Unavailable)?;
        if path.split('/').any(|seg| seg == "..") || path.contains('\0') {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        ObjectLocation::parse(&format!("{}/{}", dir, path.trim_start_matches('/')))
    }

    /// Fresh location for an uploaded recording of the given content type
    pub fn new_upload_location(&self, content_type: Option<&str>) -> StorageResult<ObjectLocation> {
        let dir = self.private_dir.as_ref().ok_or(StorageError::Unavailable)?;
        let ext = content_type
            .and_then(extension_for)
            .unwrap_or(DEFAULT_EXTENSION);
        ObjectLocation::parse(&format!("{}/videos/{}.{}", dir, uuid::Uuid::new_v4(), ext))
    }
}

/// HTTP method a signed URL authorizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignedMethod {
    Get,
    Head,
    Put,
    Delete,
}

impl SignedMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignedMethod::Get => "GET",
            SignedMethod::Head => "HEAD",
            SignedMethod::Put => "PUT",
            SignedMethod::Delete => "DELETE",
        }
    }
}

/// Issues time-limited URLs authorizing one method on one object
#[async_trait]
pub trait UrlSigner: Send + Sync {
    async fn sign(
        &self,
        location: &ObjectLocation,
        method: SignedMethod,
        ttl: Duration,
    ) -> StorageResult<String>;
}

/// Size and type of a stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub size: u64,
    pub content_type: Option<String>,
}

/// Streamed object contents
pub type ObjectBody = BoxStream<'static, std::io::Result<Bytes>>;

/// Reads and writes object bytes
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Metadata, or None if the object does not exist
    async fn head(&self, location: &ObjectLocation) -> StorageResult<Option<ObjectMeta>>;

    /// Stream the object, or one range of it
    async fn read(
        &self,
        location: &ObjectLocation,
        range: Option<ByteRange>,
    ) -> StorageResult<ObjectBody>;

    /// Store the object, replacing any previous contents
    async fn write(
        &self,
        location: &ObjectLocation,
        content_type: Option<&str>,
        bytes: Bytes,
    ) -> StorageResult<ObjectMeta>;
}

/// Extensions of the media types objects are stored as
const MEDIA_TYPES: &[(&str, &str)] = &[
    ("webm", "video/webm"),
    ("mp4", "video/mp4"),
    ("mov", "video/quicktime"),
    ("framelog", "application/x-frame-log"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
];

/// Extension used when the content type of an upload is unknown
pub const DEFAULT_EXTENSION: &str = "webm";

/// Content type implied by an object name's extension
pub fn content_type_for(name: &str) -> Option<&'static str> {
    let (_, ext) = name.rsplit_once('.')?;
    MEDIA_TYPES
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(ext))
        .map(|(_, content_type)| *content_type)
}

/// File extension for a content type. Parameters such as `;codecs=vp9`
/// are ignored.
pub fn extension_for(content_type: &str) -> Option<&'static str> {
    let essence = content_type.split(';').next().unwrap_or_default().trim();
    MEDIA_TYPES
        .iter()
        .find(|(_, known)| known.eq_ignore_ascii_case(essence))
        .map(|(ext, _)| *ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths() -> ObjectPaths {
        ObjectPaths::new(Some("/replit-objstore-abc/.private/".to_string()))
            .with_origin("http://localhost:5000/storage")
    }

    #[test]
    fn location_splits_bucket_and_name() {
        let loc = ObjectLocation::parse("/bucket/.private/videos/a.webm").unwrap();
        assert_eq!(loc.bucket, "bucket");
        assert_eq!(loc.name, ".private/videos/a.webm");
        assert_eq!(loc.path(), "/bucket/.private/videos/a.webm");

        assert!(ObjectLocation::parse("/bucket").is_err());
        assert!(ObjectLocation::parse("/bucket/../etc/passwd").is_err());
    }

    #[test]
    fn remote_upload_url_normalizes_to_objects_path() {
        let url = "https://storage.googleapis.com/replit-objstore-abc/.private/videos/x.webm?X-Goog-Signature=1";
        assert_eq!(paths().normalize_public_url(url), "/objects/videos/x.webm");
    }

    #[test]
    fn local_upload_url_normalizes_to_objects_path() {
        let url = "http://localhost:5000/storage/replit-objstore-abc/.private/videos/x.webm?expires=1&signature=ab";
        assert_eq!(paths().normalize_public_url(url), "/objects/videos/x.webm");
    }

    #[test]
    fn objects_path_resolves_under_private_dir() {
        let loc = paths().resolve("videos/x.webm").unwrap();
        assert_eq!(loc.bucket, "replit-objstore-abc");
        assert_eq!(loc.name, ".private/videos/x.webm");
        assert!(paths().resolve("../secret").is_err());
    }

    #[test]
    fn upload_locations_need_configuration() {
        let unconfigured = ObjectPaths::new(None);
        assert!(matches!(unconfigured.new_upload_location(None), Err(StorageError::Unavailable)));
        assert!(matches!(unconfigured.resolve("videos/x.webm"), Err(StorageError::Unavailable)));

        let loc = paths().new_upload_location(None).unwrap();
        assert!(loc.name.starts_with(".private/videos/"));
        assert!(loc.name.ends_with(".webm"));

        let loc = paths()
            .new_upload_location(Some("application/x-frame-log"))
            .unwrap();
        assert!(loc.name.ends_with(".framelog"));

        let loc = paths().new_upload_location(Some("text/plain")).unwrap();
        assert!(loc.name.ends_with(".webm"));
    }

    #[test]
    fn content_types_by_extension() {
        assert_eq!(content_type_for("a/b.WEBM"), Some("video/webm"));
        assert_eq!(content_type_for("a/b.bin"), None);
        assert_eq!(content_type_for("noextension"), None);
        assert_eq!(content_type_for("a/b.framelog"), Some("application/x-frame-log"));
    }

    #[test]
    fn extensions_ignore_codec_parameters() {
        assert_eq!(extension_for("video/webm;codecs=vp9,opus"), Some("webm"));
        assert_eq!(extension_for("application/x-frame-log"), Some("framelog"));
        assert_eq!(extension_for("application/octet-stream"), None);
    }
}
