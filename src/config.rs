//! Server configuration from the environment

use crate::storage::sidecar::DEFAULT_SIDECAR_ENDPOINT;
use std::path::PathBuf;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_DATA_DIR: &str = "data";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid {var}={value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// Where uploaded objects go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    /// Files on local disk, uploads through this server's signed `/storage` route
    Local {
        root: PathBuf,
        /// HMAC key for upload URLs; generated at startup when absent
        secret: Option<String>,
    },
    /// Remote storage through a signing sidecar
    Sidecar { endpoint: String },
}

/// Which encoder turns recordings into artifacts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderKind {
    /// WebM/VP9 through an ffmpeg child process
    Ffmpeg { binary: String },
    /// In-process frame log, needs no external tools
    FrameLog,
}

/// Where screen, camera and audio come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureBackend {
    /// Platform devices, as far as this build supports them
    #[default]
    Native,
    /// Generated test patterns and tones, for headless runs
    Synthetic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    /// Directory holding `videos.json`
    pub data_dir: PathBuf,
    /// `/{bucket}/{prefix}` that uploads are written under
    pub private_object_dir: Option<String>,
    /// URL this server is reachable at, used for self-referencing URLs
    pub public_base_url: String,
    pub storage: StorageBackend,
    pub encoder: EncoderKind,
    pub capture: CaptureBackend,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any variable lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let port = match get("PORT") {
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                var: "PORT",
                value,
                reason: "expected a port number",
            })?,
            None => DEFAULT_PORT,
        };

        let private_object_dir = match get("PRIVATE_OBJECT_DIR") {
            Some(dir) if !dir.starts_with('/') || dir.trim_matches('/').is_empty() => {
                return Err(ConfigError::Invalid {
                    var: "PRIVATE_OBJECT_DIR",
                    value: dir,
                    reason: "expected /{bucket}/{prefix}",
                })
            }
            dir => dir,
        };

        let storage = match get("LOCAL_STORAGE_PATH") {
            Some(root) => StorageBackend::Local {
                root: PathBuf::from(root),
                secret: get("UPLOAD_SIGNING_SECRET"),
            },
            None => StorageBackend::Sidecar {
                endpoint: get("OBJECT_SIGNER_ENDPOINT")
                    .unwrap_or_else(|| DEFAULT_SIDECAR_ENDPOINT.to_string()),
            },
        };

        let encoder = match get("ENCODER").as_deref() {
            None | Some("ffmpeg") => EncoderKind::Ffmpeg {
                binary: get("FFMPEG_PATH").unwrap_or_else(|| "ffmpeg".to_string()),
            },
            Some("frame-log") => EncoderKind::FrameLog,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "ENCODER",
                    value: other.to_string(),
                    reason: "expected ffmpeg or frame-log",
                })
            }
        };

        let capture = match get("CAPTURE").as_deref() {
            None | Some("native") => CaptureBackend::Native,
            Some("synthetic") => CaptureBackend::Synthetic,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "CAPTURE",
                    value: other.to_string(),
                    reason: "expected native or synthetic",
                })
            }
        };

        Ok(Self {
            port,
            data_dir: get("DATA_DIR").map_or_else(|| PathBuf::from(DEFAULT_DATA_DIR), PathBuf::from),
            private_object_dir,
            public_base_url: get("PUBLIC_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| format!("http://localhost:{port}")),
            storage,
            encoder,
            capture,
        })
    }
}
