//! screencast - screen and webcam recordings, made simple.
//!
//! Captures the screen, a webcam, or both composited picture-in-picture,
//! encodes the result, uploads it to object storage and keeps a small JSON
//! catalog of recordings served over HTTP.

pub mod capture;
pub mod commands;
pub mod compositor;
pub mod config;
pub mod recorder;
pub mod storage;
pub mod store;
pub mod upload;
pub mod utils;

use anyhow::Context;
use capture::{CameraSource, CaptureSources, DisplaySource, SyntheticCamera, SyntheticDisplay};
use commands::AppState;
use config::{CaptureBackend, EncoderKind, ServerConfig, StorageBackend};
use recorder::{EncoderFactory, FfmpegEncoder, FrameLogEncoder, MediaEncoder, Recorder};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use storage::{
    LocalObjectStore, LocalSigner, ObjectPaths, ObjectStore, SidecarObjectStore, SidecarSigner,
    UrlSigner,
};
use store::VideoStore;
use tokio::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use upload::UploadCoordinator;

/// Initialize tracing/logging. Later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "screencast=debug,screencast_lib=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// Platform capture devices this build was compiled with. Anything not
/// compiled in falls back to its synthetic counterpart.
fn native_sources() -> CaptureSources {
    #[cfg(feature = "native-audio")]
    let audio: Option<Arc<dyn capture::AudioSource>> = Some(Arc::new(capture::audio::NativeAudio::new()));
    #[cfg(not(feature = "native-audio"))]
    let audio: Option<Arc<dyn capture::AudioSource>> = None;

    #[cfg(feature = "native-display")]
    let display: Arc<dyn DisplaySource> = {
        let display = capture::screen::NativeDisplay::new();
        Arc::new(match audio.clone() {
            Some(audio) => display.with_audio(audio),
            None => display,
        })
    };
    #[cfg(not(feature = "native-display"))]
    let display: Arc<dyn DisplaySource> = {
        tracing::warn!("Built without native-display; recording a generated test pattern");
        Arc::new(SyntheticDisplay::new())
    };

    #[cfg(feature = "native-camera")]
    let camera: Arc<dyn CameraSource> = {
        let camera = capture::webcam::NativeCamera::new();
        Arc::new(match audio {
            Some(audio) => camera.with_audio(audio),
            None => camera,
        })
    };
    #[cfg(not(feature = "native-camera"))]
    let camera: Arc<dyn CameraSource> = {
        tracing::warn!("Built without native-camera; using a generated camera");
        let _ = audio;
        Arc::new(SyntheticCamera::default())
    };

    CaptureSources::new(display, camera)
}

fn capture_sources(backend: CaptureBackend) -> CaptureSources {
    match backend {
        CaptureBackend::Native => native_sources(),
        CaptureBackend::Synthetic => {
            tracing::info!("Using synthetic capture sources");
            CaptureSources::new(Arc::new(SyntheticDisplay::new()), Arc::new(SyntheticCamera::default()))
        }
    }
}

fn encoder_factory(kind: &EncoderKind) -> EncoderFactory {
    match kind.clone() {
        EncoderKind::Ffmpeg { binary } => Arc::new(move || {
            Box::new(FfmpegEncoder::new().with_binary(binary.clone())) as Box<dyn MediaEncoder>
        }),
        EncoderKind::FrameLog => {
            Arc::new(|| Box::new(FrameLogEncoder::new()) as Box<dyn MediaEncoder>)
        }
    }
}

/// Wire storage, the metadata store and the recorder from configuration
pub async fn build_state(config: &ServerConfig) -> anyhow::Result<Arc<AppState>> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(300))
        .build()
        .context("Failed to build HTTP client")?;

    let mut paths = ObjectPaths::new(config.private_object_dir.clone());
    if paths.private_dir().is_none() {
        tracing::warn!("PRIVATE_OBJECT_DIR not set; uploads are disabled");
    }

    let (signer, objects, local_signer) = match &config.storage {
        StorageBackend::Local { root, secret } => {
            let secret = match secret {
                Some(secret) => secret.clone(),
                None => {
                    tracing::warn!(
                        "UPLOAD_SIGNING_SECRET not set; upload URLs will not survive a restart"
                    );
                    format!("{}{}", uuid::Uuid::new_v4().simple(), uuid::Uuid::new_v4().simple())
                }
            };
            let local = LocalSigner::new(
                secret.into_bytes(),
                format!("{}/storage", config.public_base_url),
            );
            paths = paths.with_origin(local.base_url());
            tracing::info!("Storing objects under {:?}", root);
            let signer: Arc<dyn UrlSigner> = Arc::new(local.clone());
            let objects: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(root.clone()));
            (signer, objects, Some(local))
        }
        StorageBackend::Sidecar { endpoint } => {
            tracing::info!("Signing object URLs through {}", endpoint);
            let signer: Arc<dyn UrlSigner> =
                Arc::new(SidecarSigner::new(endpoint.clone(), http.clone()));
            let objects: Arc<dyn ObjectStore> =
                Arc::new(SidecarObjectStore::new(signer.clone(), http.clone()));
            (signer, objects, None)
        }
    };

    let recorder = Recorder::new(
        capture_sources(config.capture),
        encoder_factory(&config.encoder),
        UploadCoordinator::with_client(config.public_base_url.clone(), http),
    )
    .await;

    Ok(Arc::new(AppState {
        videos: VideoStore::new(&config.data_dir),
        paths,
        signer,
        objects,
        local_signer,
        recorder: Mutex::new(recorder),
    }))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

/// Run the server until interrupted
pub async fn run() -> anyhow::Result<()> {
    init_tracing();
    tracing::info!("Starting screencast v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::from_env()?;
    let state = build_state(&config).await?;
    let app = commands::router(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server failed")?;

    state.recorder.lock().await.shutdown().await;
    Ok(())
}
