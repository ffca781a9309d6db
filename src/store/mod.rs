//! Video metadata store
//!
//! Persisted records of uploaded videos plus the analytics derived from them.

pub mod analytics;
pub mod schema;
pub mod videos;

pub use analytics::Analytics;
pub use schema::{NewVideo, VideoCollection, VideoQuality, VideoRecord, VideoType};
pub use videos::{RecordDraft, StoreError, StoreResult, VideoStore};
