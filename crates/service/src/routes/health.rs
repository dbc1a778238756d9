//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub store: &'static str,
    pub bus: &'static str,
    pub simulated_participants: bool,
}

/// GET /health — reports liveness and the backends in use.
pub async fn check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        store: state.backends.store,
        bus: state.backends.bus,
        simulated_participants: state.simulation.is_some(),
    })
}
