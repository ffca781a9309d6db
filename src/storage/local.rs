//! Local disk object storage with HMAC-signed upload URLs

use super::{
    content_type_for, ByteRange, ObjectBody, ObjectLocation, ObjectMeta, ObjectStore,
    SignedMethod, StorageError, StorageResult, UrlSigner,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

type HmacSha256 = Hmac<Sha256>;

/// Objects stored as files under `root/{bucket}/{name}`
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_path(&self, location: &ObjectLocation) -> StorageResult<PathBuf> {
        let mut path = self.root.join(&location.bucket);
        for segment in location.name.split('/') {
            if segment.is_empty() || segment == "." {
                continue;
            }
            if segment == ".." || segment.contains('\\') {
                return Err(StorageError::InvalidPath(location.path()));
            }
            path.push(segment);
        }
        Ok(path)
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn head(&self, location: &ObjectLocation) -> StorageResult<Option<ObjectMeta>> {
        let path = self.file_path(location)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(Some(ObjectMeta {
                size: meta.len(),
                content_type: content_type_for(&location.name).map(str::to_string),
            })),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn read(
        &self,
        location: &ObjectLocation,
        range: Option<ByteRange>,
    ) -> StorageResult<ObjectBody> {
        let path = self.file_path(location)?;
        let mut file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(location.path()))
            }
            Err(e) => return Err(e.into()),
        };

        let body = match range {
            Some(range) => {
                file.seek(SeekFrom::Start(range.start)).await?;
                ReaderStream::new(file.take(range.len())).boxed()
            }
            None => ReaderStream::new(file).boxed(),
        };
        Ok(body)
    }

    async fn write(
        &self,
        location: &ObjectLocation,
        content_type: Option<&str>,
        bytes: Bytes,
    ) -> StorageResult<ObjectMeta> {
        let path = self.file_path(location)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &bytes).await?;

        tracing::debug!("Stored {} ({} bytes) at {:?}", location, bytes.len(), path);
        Ok(ObjectMeta {
            size: bytes.len() as u64,
            content_type: content_type
                .map(str::to_string)
                .or_else(|| content_type_for(&location.name).map(str::to_string)),
        })
    }
}

/// Signs URLs pointing at this server's `/storage` upload route.
///
/// The signature is HMAC-SHA256 over `METHOD\n/{bucket}/{name}\n{expires}`,
/// hex encoded, with `expires` in unix seconds.
#[derive(Clone)]
pub struct LocalSigner {
    secret: Vec<u8>,
    base_url: String,
}

impl std::fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSigner")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl LocalSigner {
    /// `base_url` is the URL prefix of the upload route, e.g. `http://host/storage`
    pub fn new(secret: impl Into<Vec<u8>>, base_url: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn mac(&self, location: &ObjectLocation, method: SignedMethod, expires: i64) -> StorageResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| StorageError::Signing(e.to_string()))?;
        mac.update(method.as_str().as_bytes());
        mac.update(b"\n");
        mac.update(location.path().as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        Ok(mac)
    }

    /// Hex signature authorizing `method` on `location` until `expires`
    pub fn signature(&self, location: &ObjectLocation, method: SignedMethod, expires: i64) -> StorageResult<String> {
        let mac = self.mac(location, method, expires)?;
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Check a signature presented with a request
    pub fn verify(
        &self,
        location: &ObjectLocation,
        method: SignedMethod,
        expires: i64,
        signature: &str,
    ) -> StorageResult<()> {
        if expires < chrono::Utc::now().timestamp() {
            return Err(StorageError::Forbidden("signature expired".to_string()));
        }
        let provided = hex::decode(signature)
            .map_err(|_| StorageError::Forbidden("malformed signature".to_string()))?;
        self.mac(location, method, expires)?
            .verify_slice(&provided)
            .map_err(|_| StorageError::Forbidden("invalid signature".to_string()))
    }
}

#[async_trait]
impl UrlSigner for LocalSigner {
    async fn sign(
        &self,
        location: &ObjectLocation,
        method: SignedMethod,
        ttl: Duration,
    ) -> StorageResult<String> {
        let expires = chrono::Utc::now().timestamp() + ttl.as_secs() as i64;
        let signature = self.signature(location, method, expires)?;
        Ok(format!(
            "{}{}?expires={}&signature={}",
            self.base_url,
            location.url_path(),
            expires,
            signature
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    fn location() -> ObjectLocation {
        ObjectLocation::parse("/bucket/.private/videos/a.webm").unwrap()
    }

    async fn collect(body: ObjectBody) -> Vec<u8> {
        let chunks: Vec<Bytes> = body.try_collect().await.unwrap();
        chunks.concat()
    }

    #[tokio::test]
    async fn write_then_read_ranges() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        let bytes: Vec<u8> = (0..=255u8).cycle().take(1000).collect();

        let meta = store.write(&location(), None, Bytes::from(bytes.clone())).await.unwrap();
        assert_eq!(meta.size, 1000);
        assert_eq!(meta.content_type.as_deref(), Some("video/webm"));

        let head = store.head(&location()).await.unwrap().unwrap();
        assert_eq!(head.size, 1000);

        let full = collect(store.read(&location(), None).await.unwrap()).await;
        assert_eq!(full, bytes);

        let part = collect(
            store
                .read(&location(), Some(ByteRange { start: 100, end: 199 }))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(part, &bytes[100..200]);
    }

    #[tokio::test]
    async fn missing_objects() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());

        assert!(store.head(&location()).await.unwrap().is_none());
        assert!(matches!(
            store.read(&location(), None).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn signed_url_verifies() {
        let signer = LocalSigner::new(b"secret".to_vec(), "http://localhost:5000/storage/");
        let url = signer
            .sign(&location(), SignedMethod::Put, Duration::from_secs(900))
            .await
            .unwrap();
        assert!(url.starts_with("http://localhost:5000/storage/bucket/.private/videos/a.webm?expires="));

        let query = url.split_once('?').unwrap().1;
        let mut expires = 0;
        let mut signature = String::new();
        for pair in query.split('&') {
            match pair.split_once('=').unwrap() {
                ("expires", v) => expires = v.parse().unwrap(),
                ("signature", v) => signature = v.to_string(),
                _ => {}
            }
        }

        signer.verify(&location(), SignedMethod::Put, expires, &signature).unwrap();
        assert!(signer.verify(&location(), SignedMethod::Get, expires, &signature).is_err());

        let other = ObjectLocation::parse("/bucket/.private/videos/b.webm").unwrap();
        assert!(signer.verify(&other, SignedMethod::Put, expires, &signature).is_err());

        let forged = LocalSigner::new(b"other".to_vec(), "http://localhost:5000/storage");
        assert!(forged.verify(&location(), SignedMethod::Put, expires, &signature).is_err());
    }

    #[test]
    fn expired_signature_is_forbidden() {
        let signer = LocalSigner::new(b"secret".to_vec(), "http://localhost/storage");
        let expires = chrono::Utc::now().timestamp() - 10;
        let signature = signer.signature(&location(), SignedMethod::Put, expires).unwrap();
        assert!(matches!(
            signer.verify(&location(), SignedMethod::Put, expires, &signature),
            Err(StorageError::Forbidden(_))
        ));
    }
}
