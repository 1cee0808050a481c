//! HTTP/WebSocket API layer.
//!
//! Thin handlers over the core services: admission pre-check, receiver
//! description, health, and the two WebSocket endpoints. Router
//! construction and server startup live here; the session run loop is in
//! [`ws`].

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::admission::AdmissionControl;
use crate::bus::FanoutBus;
use crate::dxcluster::{self, DxCluster};
use crate::error::{WavegateError, WavegateResult};
use crate::extension::ExtensionRegistry;
use crate::ingest::{self, IngestHandle};
use crate::session::SessionRegistry;
use crate::state::Config;

pub mod http;
pub mod ws;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind the TCP listener.
    #[error("Failed to bind to port: {0}")]
    Bind(#[from] std::io::Error),
}

/// Shared application state for the API layer.
///
/// A thin bundle of service handles; all business logic lives in the
/// services themselves.
#[derive(Clone)]
pub struct AppState {
    /// Validated server configuration.
    pub config: Arc<Config>,
    /// Admission policy and session counters.
    pub admission: Arc<AdmissionControl>,
    /// Wideband I/Q fan-out.
    pub bus: Arc<FanoutBus>,
    /// Live session registry.
    pub sessions: Arc<SessionRegistry>,
    /// Audio-extension factories.
    pub extensions: Arc<ExtensionRegistry>,
    /// DX-cluster client, when configured.
    pub dx_cluster: Option<Arc<DxCluster>>,
    /// RTP ingest handle (health reporting, stop on shutdown).
    pub ingest: Arc<IngestHandle>,
    /// Server-wide shutdown signal; sessions hold child tokens.
    pub shutdown: CancellationToken,
}

/// Builds all core services from a validated configuration.
///
/// The extension registry is passed in so embedders register their
/// decoder factories before any session can attach one.
pub fn bootstrap(
    config: Config,
    extensions: ExtensionRegistry,
    shutdown: CancellationToken,
) -> WavegateResult<AppState> {
    config
        .validate()
        .map_err(WavegateError::Configuration)?;

    let bus = Arc::new(FanoutBus::new(&config.streaming));
    let admission = Arc::new(AdmissionControl::new(config.admission.clone()));
    let ingest = Arc::new(ingest::start(
        config.ingest.clone(),
        Arc::clone(&bus),
        &shutdown,
    ));
    let dx_cluster = config
        .dx_cluster
        .clone()
        .map(|dx| dxcluster::start(dx, &shutdown));

    Ok(AppState {
        config: Arc::new(config),
        admission,
        bus,
        sessions: Arc::new(SessionRegistry::new()),
        extensions: Arc::new(extensions),
        dx_cluster,
        ingest,
        shutdown,
    })
}

/// Starts the HTTP server and runs it until the shutdown token fires.
pub async fn start_server(state: AppState, port: u16) -> Result<(), ServerError> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("Server listening on http://0.0.0.0:{}", port);

    let shutdown = state.shutdown.clone();
    let sessions = Arc::clone(&state.sessions);
    let app = http::create_router(state);

    // Use into_make_service_with_connect_info so handlers can extract the
    // client address for admission.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown.cancelled().await;
        sessions.close_all();
    })
    .await?;
    Ok(())
}
