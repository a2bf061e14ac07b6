use anyhow::{Context, Result};
use facegate_core::OnnxProvider;
use facegate_hw::Camera;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod http;
mod poller;
mod publisher;
mod state;

use config::Config;
use publisher::Publisher;
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();
    tracing::info!(
        bind = %config.bind,
        images_dir = %config.images_dir.display(),
        model = %config.embed_model,
        threshold = config.match_threshold,
        "facegated starting"
    );

    if config.poll_autostart && config.camera_device.is_none() {
        anyhow::bail!("continuous polling requires a camera: set FACEGATE_CAMERA_DEVICE");
    }

    // Fail fast: models and camera must be available before serving.
    let provider = OnnxProvider::load(
        &config.detector_model_path(),
        &config.embedder_model_path(),
        &config.embed_model,
    )
    .context("failed to load embedding models")?;

    let camera = match &config.camera_device {
        None => {
            tracing::info!("no camera configured, running HTTP-only");
            None
        }
        Some(device) => {
            let camera = Camera::open(device)
                .with_context(|| format!("failed to open camera {device}"))?;
            Some(camera)
        }
    };

    let engine = engine::spawn_engine(
        provider,
        camera,
        config.camera_device.clone(),
        config.warmup_frames,
        Duration::from_secs(config.verify_timeout_secs),
    );

    std::fs::create_dir_all(&config.images_dir).with_context(|| {
        format!("failed to create images directory {}", config.images_dir.display())
    })?;
    let catalog = engine
        .build_catalog(config.images_dir.clone())
        .await
        .context("failed to build reference catalog")?;
    tracing::info!(
        identities = catalog.len(),
        references = catalog.reference_count(),
        "reference catalog ready"
    );

    let publisher = Publisher::connect(&config.mqtt_host, config.mqtt_port, &config.mqtt_topic);
    publisher.publish_status(true).await;

    let bind = config.bind.clone();
    let autostart = config.poll_autostart;
    let state = Arc::new(AppState::new(config, engine, publisher, catalog));

    if autostart {
        state.poller.start(state.clone());
    }

    let app = http::build_router(state.clone());
    let addr: SocketAddr = bind.parse().context("invalid FACEGATE_BIND address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "facegated listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.poller.stop();
    state.publisher.publish_status(false).await;
    state.publisher.disconnect().await;
    tracing::info!("facegated shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
