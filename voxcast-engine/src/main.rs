//! Voxcast engine - main entry point
//!
//! Builds the audio engine (focus arbiter, call session, devices) and serves
//! the HTTP/SSE control surface the UI layer talks to.
//!
//! The live transport defaults to the local loopback (mic echoes back through
//! the speaker path) until a remote transport implementation is wired in; the
//! synthesis endpoint reports unavailable until a backend is configured.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use voxcast_common::events::EventBus;
use voxcast_common::telemetry::TelemetryRecorder;

use voxcast_engine::api;
use voxcast_engine::audio::{CpalCapture, CpalOutput};
use voxcast_engine::config::EngineConfig;
use voxcast_engine::focus::FocusArbiter;
use voxcast_engine::session::{CallSession, LoopbackTransport, StreamScheduler};
use voxcast_engine::SharedState;

/// Command-line arguments for voxcast-engine
#[derive(Parser, Debug)]
#[command(name = "voxcast-engine")]
#[command(about = "Audio engine for voxcast")]
#[command(version)]
struct Args {
    /// Port to listen on (overrides the config file)
    #[arg(short, long, env = "VOXCAST_PORT")]
    port: Option<u16>,

    /// Path to the TOML configuration file
    #[arg(short, long, env = "VOXCAST_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voxcast_engine=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = EngineConfig::load(args.config.as_deref()).context("Failed to load config")?;
    if let Some(port) = args.port {
        config.port = port;
    }

    info!("Starting voxcast engine on port {}", config.port);

    let telemetry = Arc::new(TelemetryRecorder::new(config.telemetry.capacity));
    let events = EventBus::new(256);
    let state = Arc::new(SharedState::new(events.clone()));

    // One arbiter per audio session, injected everywhere it is consulted
    let arbiter = Arc::new(FocusArbiter::new(
        config.focus_config(),
        config.interrupt_mode,
        Arc::clone(&telemetry),
        events.clone(),
    ));

    let output = Arc::new(
        CpalOutput::open(
            config.audio.output_device.clone(),
            config.audio.output_sample_rate,
        )
        .context("Failed to open audio output")?,
    );
    let capture = Arc::new(CpalCapture::new(
        config.audio.input_device.clone(),
        config.audio.capture_sample_rate,
    ));
    info!(
        "Audio devices ready (output {} Hz, capture {} Hz)",
        config.audio.output_sample_rate, config.audio.capture_sample_rate
    );

    let scheduler = Arc::new(StreamScheduler::new(
        output.clone(),
        config.scheduler_config(),
        Arc::clone(&telemetry),
    ));

    let session = Arc::new(CallSession::new(
        scheduler,
        Arc::new(LoopbackTransport::new()),
        capture,
        output,
        Arc::clone(&state),
        Arc::clone(&telemetry),
    ));

    // Build the application router
    let app_state = api::AppState {
        arbiter,
        session,
        synthesis: None, // no backend configured yet
        state,
        telemetry,
        port: config.port,
    };

    let app = api::create_router(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
