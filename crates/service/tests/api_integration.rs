//! Integration tests for the HTTP surface.

use std::sync::{Arc, OnceLock};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use bus::{InMemoryBus, MessageBus, Topics};
use common::{GoodId, OrderId, UserId};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{InMemoryInventory, InMemoryOrders};
use saga_service::{AppState, Backends, Simulation};
use saga_store::{InMemorySagaStore, Saga, SagaStep, SagaStore};
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            metrics_exporter_prometheus::PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

const MEMORY_BACKENDS: Backends = Backends {
    store: "memory",
    bus: "memory",
};

fn setup() -> (axum::Router, InMemorySagaStore) {
    let store = InMemorySagaStore::new();
    let state = Arc::new(AppState {
        store: Arc::new(store.clone()),
        backends: MEMORY_BACKENDS,
        simulation: None,
    });
    (saga_service::create_app(state, get_metrics_handle()), store)
}

fn setup_simulated() -> (axum::Router, InMemoryBus, Simulation) {
    let bus = InMemoryBus::new();
    let shared: Arc<dyn MessageBus> = Arc::new(bus.clone());
    let simulation = Simulation {
        orders: InMemoryOrders::new(shared.clone(), Topics::default()),
        inventory: InMemoryInventory::new(shared, Topics::default()),
    };
    let state = Arc::new(AppState {
        store: Arc::new(InMemorySagaStore::new()),
        backends: MEMORY_BACKENDS,
        simulation: Some(simulation.clone()),
    });
    (
        saga_service::create_app(state, get_metrics_handle()),
        bus,
        simulation,
    )
}

async fn get(app: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

async fn send_json(
    app: axum::Router,
    method: &str,
    uri: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_string(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

async fn stored_saga(store: &InMemorySagaStore, step: SagaStep) -> Saga {
    let mut saga = Saga::start(OrderId::new(), UserId::new());
    store.create(&saga).await.unwrap();
    if step != SagaStep::OrderCreated {
        saga.transition_to(step).unwrap();
        saga.set_error_reason("insufficient stock");
        saga = store.update(&saga).await.unwrap();
    }
    saga
}

#[tokio::test]
async fn test_health_check() {
    let (app, _) = setup();

    let (status, json) = get(app, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["store"], "memory");
    assert_eq!(json["simulated_participants"], false);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (app, _) = setup();

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));
}

#[tokio::test]
async fn test_get_saga_by_id() {
    let (app, store) = setup();
    let saga = stored_saga(&store, SagaStep::OrderCreated).await;

    let (status, json) = get(app, &format!("/sagas/{}", saga.id())).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["saga_id"], saga.id().to_string());
    assert_eq!(json["order_id"], saga.order_id().to_string());
    assert_eq!(json["current_step"], "ORDER_CREATED");
    assert_eq!(json["finished"], false);
    assert_eq!(json["version"], 1);
    assert!(json["error_reason"].is_null());
}

#[tokio::test]
async fn test_get_saga_by_order() {
    let (app, store) = setup();
    let saga = stored_saga(&store, SagaStep::Compensated).await;

    let (status, json) = get(app, &format!("/orders/{}/saga", saga.order_id())).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["saga_id"], saga.id().to_string());
    assert_eq!(json["current_step"], "COMPENSATED");
    assert_eq!(json["finished"], true);
    assert_eq!(json["error_reason"], "insufficient stock");
    assert_eq!(json["version"], 2);
}

#[tokio::test]
async fn test_missing_saga_is_not_found() {
    let (app, _) = setup();

    let (status, json) = get(app.clone(), &format!("/sagas/{}", common::SagaId::new())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].as_str().unwrap().contains("not found"));

    let (status, _) = get(app, &format!("/orders/{}/saga", OrderId::new())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_malformed_id_is_bad_request() {
    let (app, _) = setup();

    let (status, json) = get(app.clone(), "/sagas/not-a-uuid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("saga_id"));

    let (status, _) = get(app, "/orders/42/saga").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unavailable_store() {
    let (app, store) = setup();
    store.set_fail_on_read(true).await;

    let (status, _) = get(app, &format!("/orders/{}/saga", OrderId::new())).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_demo_routes_absent_without_simulation() {
    let (app, _) = setup();

    let (status, _) = send_json(app, "POST", "/orders", serde_json::json!({ "products": [] })).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_place_order_publishes_order_created() {
    let (app, bus, simulation) = setup_simulated();
    let good = GoodId::new();

    let (status, json) = send_json(
        app,
        "POST",
        "/orders",
        serde_json::json!({ "products": [{ "product_id": good.to_string(), "quantity": 2 }] }),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    let order_id: OrderId = json["order_id"].as_str().unwrap().parse().unwrap();
    assert!(simulation.orders.status(order_id).is_some());
    assert_eq!(bus.published_on("order-created").len(), 1);
}

#[tokio::test]
async fn test_place_order_requires_products() {
    let (app, bus, _) = setup_simulated();

    let (status, _) = send_json(app, "POST", "/orders", serde_json::json!({ "products": [] })).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(bus.published_count(), 0);
}

#[tokio::test]
async fn test_set_stock() {
    let (app, _, simulation) = setup_simulated();
    let good = GoodId::new();

    let (status, _) = send_json(
        app,
        "PUT",
        &format!("/inventory/{good}"),
        serde_json::json!({ "available": 7, "unit_price": 1500 }),
    )
    .await;

    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(simulation.inventory.available(good), Some(7));
}

#[tokio::test]
async fn test_service_bus_keeps_no_publish_log() {
    let bus = saga_service::in_memory_bus();
    let orders = InMemoryOrders::new(bus.clone(), Topics::default());

    for _ in 0..10 {
        orders
            .place_order(UserId::new(), vec![contracts::OrderItem::new(GoodId::new(), 1)])
            .await
            .unwrap();
    }

    assert_eq!(bus.published_count(), 0);
}
