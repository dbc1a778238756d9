//! Order saga orchestrator service.
//!
//! Wires the saga store, the message bus and the dispatch loop together,
//! and exposes an HTTP surface for health, Prometheus metrics and saga
//! inspection. With simulated participants enabled it also accepts demo
//! orders and stock levels over HTTP.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use bus::{InMemoryBus, MessageBus};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{InMemoryInventory, InMemoryOrders};
use saga_store::SagaStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub store: Arc<dyn SagaStore>,
    pub backends: Backends,
    pub simulation: Option<Simulation>,
}

/// Names of the storage and transport backends in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backends {
    pub store: &'static str,
    pub bus: &'static str,
}

/// In-process participants running next to the orchestrator.
#[derive(Clone)]
pub struct Simulation {
    pub orders: InMemoryOrders<Arc<dyn MessageBus>>,
    pub inventory: InMemoryInventory<Arc<dyn MessageBus>>,
}

/// Creates the bus used when no broker is configured.
///
/// Keeps no publish log, since nothing in the service reads it.
pub fn in_memory_bus() -> InMemoryBus {
    InMemoryBus::with_capture_limit(0)
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    let mut router = Router::new()
        .route("/health", get(routes::health::check))
        .route("/sagas/{saga_id}", get(routes::sagas::get))
        .route("/orders/{order_id}/saga", get(routes::sagas::by_order));

    if state.simulation.is_some() {
        router = router
            .route("/orders", post(routes::simulation::place_order))
            .route("/inventory/{good_id}", put(routes::simulation::set_stock));
    }

    router
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
