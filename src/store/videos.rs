//! JSON-file video store
//!
//! The whole collection lives in one pretty-printed `videos.json` and is read
//! and rewritten wholesale on every operation. Writers in this process are
//! serialized by a mutex and each write replaces the file atomically through a
//! temp file in the same directory. Other processes writing the same file are
//! not coordinated with; the last writer wins.

use super::analytics::Analytics;
use super::schema::{VideoCollection, VideoRecord, VideoType, VideoQuality};
use chrono::Utc;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;

const VIDEOS_FILE: &str = "videos.json";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store task failed: {0}")]
    Task(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Fields of a record that is about to be created
#[derive(Debug, Clone, PartialEq)]
pub struct RecordDraft {
    pub video_path: String,
    pub duration: u64,
    pub kind: VideoType,
    pub quality: VideoQuality,
}

pub struct VideoStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl VideoStore {
    /// Store backed by `{data_dir}/videos.json`. The directory is created on first write.
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            path: data_dir.as_ref().join(VIDEOS_FILE),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the collection. A missing or unreadable file is an empty collection.
    async fn load(&self) -> VideoCollection {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Failed to read {}: {}", self.path.display(), e);
                }
                return VideoCollection::default();
            }
        };

        match serde_json::from_slice(&raw) {
            Ok(collection) => collection,
            Err(e) => {
                tracing::warn!("Ignoring malformed {}: {}", self.path.display(), e);
                VideoCollection::default()
            }
        }
    }

    async fn save(&self, collection: &VideoCollection) -> StoreResult<()> {
        let json = serde_json::to_vec_pretty(collection)?;
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || -> StoreResult<()> {
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            std::fs::create_dir_all(dir)?;

            let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
            tmp.write_all(&json)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&path).map_err(|e| StoreError::Io(e.error))?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }

    /// All records, newest first
    pub async fn list(&self) -> Vec<VideoRecord> {
        self.load().await.videos
    }

    pub async fn get(&self, id: &str) -> Option<VideoRecord> {
        self.load().await.videos.into_iter().find(|v| v.id == id)
    }

    /// Create a record and put it at the front of the list
    pub async fn create(&self, draft: RecordDraft) -> StoreResult<VideoRecord> {
        let _guard = self.lock.lock().await;
        let mut collection = self.load().await;

        let now = Utc::now();
        let now_ms = now.timestamp_millis().max(0) as u64;
        // Ids are creation times in ms, bumped past any existing id to stay unique
        let newest = collection
            .videos
            .iter()
            .filter_map(|v| v.id.parse::<u64>().ok())
            .max();
        let id = match newest {
            Some(newest) if newest >= now_ms => newest + 1,
            _ => now_ms,
        };

        let record = VideoRecord {
            id: id.to_string(),
            video_path: draft.video_path,
            duration: draft.duration,
            kind: draft.kind,
            quality: draft.quality,
            views: 0,
            created_at: now,
        };

        collection.videos.insert(0, record.clone());
        self.save(&collection).await?;

        tracing::info!("Created video {} ({}, {}s)", record.id, record.kind, record.duration);
        Ok(record)
    }

    /// Remove a record. Returns whether one was removed; removing an absent
    /// id leaves the file untouched.
    pub async fn delete(&self, id: &str) -> StoreResult<bool> {
        let _guard = self.lock.lock().await;
        let mut collection = self.load().await;

        let before = collection.videos.len();
        collection.videos.retain(|v| v.id != id);
        if collection.videos.len() == before {
            tracing::debug!("Delete of unknown video {}", id);
            return Ok(false);
        }

        self.save(&collection).await?;
        tracing::info!("Deleted video {}", id);
        Ok(true)
    }

    /// Add one view. Returns the updated record, None if absent.
    pub async fn increment_views(&self, id: &str) -> StoreResult<Option<VideoRecord>> {
        let _guard = self.lock.lock().await;
        let mut collection = self.load().await;

        let Some(record) = collection.videos.iter_mut().find(|v| v.id == id) else {
            return Ok(None);
        };
        record.views = record.views.saturating_add(1);
        let updated = record.clone();

        self.save(&collection).await?;
        Ok(Some(updated))
    }

    /// Full-scan aggregate over every record
    pub async fn analytics(&self) -> Analytics {
        Analytics::from_records(&self.load().await.videos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn draft(duration: u64, kind: VideoType, quality: VideoQuality) -> RecordDraft {
        RecordDraft {
            video_path: format!("/objects/videos/{duration}.webm"),
            duration,
            kind,
            quality,
        }
    }

    #[tokio::test]
    async fn missing_file_reads_as_empty() {
        let dir = TempDir::new().unwrap();
        let store = VideoStore::new(dir.path().join("nested"));
        assert!(store.list().await.is_empty());
        assert_eq!(store.analytics().await.total_videos, 0);
    }

    #[tokio::test]
    async fn malformed_file_reads_as_empty() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(VIDEOS_FILE), b"{not json").unwrap();
        let store = VideoStore::new(dir.path());
        assert!(store.list().await.is_empty());
    }

    #[tokio::test]
    async fn create_prepends_with_unique_ids() {
        let dir = TempDir::new().unwrap();
        let store = VideoStore::new(dir.path());

        let first = store.create(draft(1, VideoType::Screen, VideoQuality::High)).await.unwrap();
        let second = store.create(draft(2, VideoType::Screen, VideoQuality::Low)).await.unwrap();

        assert_ne!(first.id, second.id);
        let list = store.list().await;
        assert_eq!(list[0].id, second.id);
        assert_eq!(list[1].id, first.id);
        assert_eq!(list[1].views, 0);

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(raw.starts_with("{\n  \"videos\""));
    }

    #[tokio::test]
    async fn created_webcam_video_shows_in_analytics() {
        let dir = TempDir::new().unwrap();
        let store = VideoStore::new(dir.path());
        store.create(draft(42, VideoType::Webcam, VideoQuality::Standard)).await.unwrap();

        let stats = store.analytics().await;
        assert_eq!(stats.total_videos, 1);
        assert_eq!(stats.total_duration, 42);
        assert_eq!(stats.by_type.webcam, 1);
        assert_eq!(stats.by_quality.standard, 1);
    }

    #[tokio::test]
    async fn delete_of_absent_id_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let store = VideoStore::new(dir.path());
        let record = store.create(draft(5, VideoType::Screen, VideoQuality::Medium)).await.unwrap();
        let before = std::fs::read(store.path()).unwrap();

        assert!(!store.delete("does-not-exist").await.unwrap());
        assert_eq!(std::fs::read(store.path()).unwrap(), before);

        assert!(store.delete(&record.id).await.unwrap());
        assert!(store.list().await.is_empty());
    }

    #[tokio::test]
    async fn views_only_go_up() {
        let dir = TempDir::new().unwrap();
        let store = VideoStore::new(dir.path());
        let record = store.create(draft(5, VideoType::Combined, VideoQuality::High)).await.unwrap();

        for expected in 1..=3 {
            let updated = store.increment_views(&record.id).await.unwrap().unwrap();
            assert_eq!(updated.views, expected);
        }
        assert!(store.increment_views("missing").await.unwrap().is_none());
        assert_eq!(store.analytics().await.total_views, 3);
    }
}
