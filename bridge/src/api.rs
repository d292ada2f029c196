//! Monitoring HTTP API.
//!
//! - `GET /healthz` - 200 when every named connection is healthy, 503 otherwise
//! - `GET /varz` - per-connector statistics as JSON

use crate::registry::ConnectionStatus;
use crate::supervisor::Bridge;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use replicator::BridgeStats;
use serde::Serialize;
use std::sync::Arc;

/// Response for `GET /healthz`.
#[derive(Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub connections: Vec<ConnectionStatus>,
}

/// Build the monitoring router.
pub fn create_router(bridge: Arc<Bridge>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/varz", get(varz))
        .with_state(bridge)
}

async fn healthz(State(bridge): State<Arc<Bridge>>) -> Response {
    let healthy = bridge.is_healthy();
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = HealthResponse {
        healthy,
        connections: bridge.connection_status(),
    };
    (status, Json(body)).into_response()
}

async fn varz(State(bridge): State<Arc<Bridge>>) -> Json<BridgeStats> {
    Json(bridge.stats())
}
