//! Engine thread — exclusive owner of the embedding provider and the
//! optional camera.
//!
//! Handlers talk to it through a clone-safe [`EngineHandle`] over an mpsc
//! channel with oneshot replies. A single consumer thread serializes all
//! provider work, so at most one embedding computation runs at a time.

use facegate_core::{
    Catalog, CatalogError, EmbeddingProvider, FaceScan, ImageData, OnnxProvider, ProviderError,
};
use facegate_hw::{Camera, CameraError, Frame};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),
    #[error("no camera configured")]
    NoCamera,
    #[error("verification timed out after {0}s")]
    Timeout(u64),
    #[error("engine thread exited")]
    ChannelClosed,
}

impl EngineError {
    /// True for frame-source failures, which the poller counts toward its
    /// faster reinit threshold.
    pub fn is_capture(&self) -> bool {
        matches!(self, EngineError::Camera(_) | EngineError::NoCamera)
    }
}

pub(crate) enum EngineRequest {
    Scan {
        image: ImageData,
        reply: oneshot::Sender<Result<FaceScan, EngineError>>,
    },
    CaptureFrame {
        reply: oneshot::Sender<Result<Frame, EngineError>>,
    },
    ReinitCamera {
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    BuildCatalog {
        root: PathBuf,
        reply: oneshot::Sender<Result<Catalog, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    pub(crate) tx: mpsc::Sender<EngineRequest>,
    pub(crate) scan_timeout: Duration,
}

impl EngineHandle {
    /// Scan an image for a face, bounded by the configured verify timeout.
    pub async fn scan(&self, image: ImageData) -> Result<FaceScan, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Scan {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        match tokio::time::timeout(self.scan_timeout, reply_rx).await {
            Err(_) => Err(EngineError::Timeout(self.scan_timeout.as_secs())),
            Ok(reply) => reply.map_err(|_| EngineError::ChannelClosed)?,
        }
    }

    /// Capture one frame from the camera.
    pub async fn capture_frame(&self) -> Result<Frame, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::CaptureFrame { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Tear down and reopen the camera (degraded-mode recovery).
    pub async fn reinit_camera(&self) -> Result<(), EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::ReinitCamera { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Rebuild the reference catalog from the on-disk tree.
    pub async fn build_catalog(&self, root: PathBuf) -> Result<Catalog, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::BuildCatalog {
                root,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The provider and camera are opened by the caller (fail-fast at startup)
/// and move into the thread. Warmup frames are discarded here so the first
/// real capture sees a stabilized sensor.
pub fn spawn_engine(
    mut provider: OnnxProvider,
    mut camera: Option<Camera>,
    camera_device: Option<String>,
    warmup_frames: usize,
    scan_timeout: Duration,
) -> EngineHandle {
    if let Some(cam) = &camera {
        if warmup_frames > 0 {
            tracing::info!(count = warmup_frames, "discarding warmup frames");
            for _ in 0..warmup_frames {
                let _ = cam.capture_frame();
            }
        }
    }

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("facegate-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Scan { image, reply } => {
                        let result = provider.scan(&image).map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                    EngineRequest::CaptureFrame { reply } => {
                        let result = match camera.as_ref() {
                            None => Err(EngineError::NoCamera),
                            Some(cam) => cam.capture_frame().map_err(EngineError::from),
                        };
                        let _ = reply.send(result);
                    }
                    EngineRequest::ReinitCamera { reply } => {
                        let result = match &camera_device {
                            None => Err(EngineError::NoCamera),
                            Some(device) => {
                                // Release the old handle before reopening.
                                camera = None;
                                match Camera::open(device) {
                                    Ok(cam) => {
                                        tracing::info!(device = %device, "camera reinitialized");
                                        camera = Some(cam);
                                        Ok(())
                                    }
                                    Err(error) => Err(EngineError::from(error)),
                                }
                            }
                        };
                        let _ = reply.send(result);
                    }
                    EngineRequest::BuildCatalog { root, reply } => {
                        let result =
                            Catalog::build(&root, &mut provider).map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    EngineHandle {
        tx,
        scan_timeout,
    }
}
