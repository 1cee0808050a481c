//! HTTP route handlers.
//!
//! All handlers are thin - they delegate to services for business logic.

use axum::extract::connect_info::ConnectInfo;
use axum::extract::State;
use axum::routing::{any, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::admission::{AdmissionDecision, ConnectRequest};
use crate::api::ws::{dxcluster_ws_handler, ws_handler};
use crate::api::AppState;
use crate::protocol_constants::SERVICE_ID;

/// Builds the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/connection", post(connection_handler))
        .route("/api/description", get(description_handler))
        .route("/health", get(health_handler))
        .route("/ws", any(ws_handler))
        .route("/ws/dxcluster", any(dxcluster_ws_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Admission pre-check request body.
#[derive(Debug, Deserialize)]
pub struct ConnectionRequest {
    #[allow(dead_code)]
    pub user_session_id: String,
    #[serde(default)]
    pub password: Option<String>,
}

/// `POST /connection` - evaluates the admission rules without reserving a
/// slot, so clients learn their fate before upgrading.
async fn connection_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(body): Json<ConnectionRequest>,
) -> Json<AdmissionDecision> {
    let decision = state.admission.check(&ConnectRequest {
        ip: addr.ip(),
        password: body.password.as_deref(),
        mode: None,
    });
    if !decision.allowed {
        log::info!(
            "[HTTP] Connection pre-check refused for {}: {}",
            decision.client_ip,
            decision.reason
        );
    }
    Json(decision)
}

/// `GET /api/description` - opaque receiver description, passed through
/// verbatim from the configuration.
async fn description_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(state.config.description.clone())
}

/// `GET /health` - liveness plus coarse service state.
async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": SERVICE_ID,
        "instance": state.config.instance,
        "ingest_healthy": state.ingest.is_healthy(),
        "sessions": state.sessions.count(),
        "dx_cluster_connected": state
            .dx_cluster
            .as_ref()
            .map(|dx| dx.is_connected()),
    }))
}
