//! Wavegate Server - headless multi-user SDR streaming gateway.
//!
//! Joins the SDR daemon's multicast I/Q feed and serves any number of
//! independently tuned WebSocket clients. Designed to run as a background
//! daemon behind a reverse proxy.

mod config;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use wavegate_core::{bootstrap, start_server, ExtensionRegistry};

use crate::config::ServerConfig;

/// Wavegate Server - multi-user WebSocket gateway for a wideband SDR.
#[derive(Parser, Debug)]
#[command(name = "wavegate-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML). Falls back to CONFIG_PATH.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "WAVEGATE_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long, env = "WAVEGATE_BIND_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Wavegate Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config_path = ServerConfig::resolve_path(args.config);
    if let Some(ref path) = config_path {
        log::info!("Using config file: {}", path.display());
    } else {
        log::info!("No config file, using defaults");
    }
    let mut config =
        ServerConfig::load(config_path.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(port) = args.port {
        config.bind_port = port;
    }

    log::info!(
        "Configuration: instance={}, bind_port={}, data_group={}, status_group={}",
        config.core.instance,
        config.bind_port,
        config.core.ingest.data_group,
        config.core.ingest.status_group
    );

    // Bootstrap services. Audio-domain decoder factories register here;
    // the headless server ships with none built in.
    let shutdown = CancellationToken::new();
    let state = bootstrap(config.core, ExtensionRegistry::new(), shutdown.clone())
        .context("Failed to bootstrap services")?;

    log::info!("Services bootstrapped successfully");
    if state.dx_cluster.is_some() {
        log::info!("DX-cluster client enabled");
    }

    // Run the HTTP server on the main runtime until shutdown.
    let server_state = state.clone();
    let bind_port = config.bind_port;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(server_state, bind_port).await {
            log::error!("Server error: {}", e);
        }
    });

    // Wait for shutdown signal
    shutdown_signal().await;

    log::info!("Shutdown signal received, cleaning up...");

    // Graceful shutdown: cancel fans out to ingest, sessions, DX client.
    shutdown.cancel();
    let _ = server_handle.await;

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
