mod capture;
mod hub;
mod ingest;
mod server;
mod watchdog;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use frame_relay_common::config::Config;
use frame_relay_common::frame::Frame;
use tracing::{error, info, warn};

use capture::{CaptureCommand, CaptureSupervisor};
use hub::FrameHub;
use ingest::Ingest;
use server::AppState;
use watchdog::Watchdog;

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    let command = CaptureCommand::from_config(&config.capture, &config.server.local_ingest_url());
    info!(
        bind = config.server.bind,
        port = config.server.port,
        command = %command.display(),
        restart_delay_ms = config.capture.restart_delay_ms,
        "starting frame relay"
    );

    let fallback = config
        .stream
        .fallback_image
        .as_deref()
        .and_then(|path| load_fallback(Path::new(path)));
    let hub = Arc::new(FrameHub::new(fallback));

    let watchdog = Arc::new(Watchdog::new(
        Duration::from_secs(config.watchdog.initial_secs),
        Duration::from_secs(config.watchdog.increment_secs),
    ));
    tokio::spawn({
        let watchdog = Arc::clone(&watchdog);
        async move { watchdog.run().await }
    });

    capture::check_program_available(&command.program).await;
    let supervisor = Arc::new(CaptureSupervisor::new(
        Arc::clone(&hub),
        command,
        Duration::from_millis(config.capture.restart_delay_ms),
    ));

    let state = Arc::new(AppState {
        hub: Arc::clone(&hub),
        ingest: Ingest::new(Arc::clone(&hub), watchdog),
        supervisor: Arc::clone(&supervisor),
        client_queue: config.stream.client_queue,
    });
    let app = server::router(state, config.server.max_frame_bytes);

    let addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap_or_else(|e| {
        eprintln!("Failed to bind to {addr}: {e}");
        std::process::exit(1);
    });
    info!(addr, "frame relay listening");

    // Only start capturing once the upload endpoint is reachable.
    tokio::spawn(async move { supervisor.run().await });

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "HTTP server terminated");
        std::process::exit(1);
    }
    info!("frame relay stopped");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

/// Read the fallback image. Problems are logged and the relay runs without one.
fn load_fallback(path: &Path) -> Option<Frame> {
    let data = match std::fs::read(path) {
        Ok(d) => d,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read fallback image");
            return None;
        }
    };
    match Frame::parse(Bytes::from(data)) {
        Ok(frame) => {
            info!(path = %path.display(), bytes = frame.len(), "loaded fallback image");
            Some(frame)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "fallback image is not a usable JPEG");
            None
        }
    }
}
