//! Demo endpoints backed by the simulated participants.
//!
//! Mounted only when the service runs its own inventory and order services.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{GoodId, UserId};
use contracts::OrderItem;
use serde::{Deserialize, Serialize};

use super::sagas::parse_id;
use crate::error::ApiError;
use crate::{AppState, Simulation};

#[derive(Deserialize)]
pub struct PlaceOrderRequest {
    pub user_id: Option<String>,
    pub products: Vec<OrderItem>,
}

#[derive(Serialize)]
pub struct OrderPlacedResponse {
    pub order_id: String,
    pub user_id: String,
}

#[derive(Deserialize)]
pub struct SetStockRequest {
    pub available: u32,
    pub unit_price: i64,
}

fn simulation(state: &AppState) -> Result<&Simulation, ApiError> {
    state
        .simulation
        .as_ref()
        .ok_or_else(|| ApiError::NotFound("Participants are not simulated".to_string()))
}

/// POST /orders — place an order through the simulated order service.
///
/// Returns as soon as OrderCreated is published; poll
/// `/orders/{order_id}/saga` for progress.
#[tracing::instrument(skip(state, req))]
pub async fn place_order(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PlaceOrderRequest>,
) -> Result<(StatusCode, Json<OrderPlacedResponse>), ApiError> {
    let simulation = simulation(&state)?;
    if req.products.is_empty() {
        return Err(ApiError::BadRequest("An order needs at least one product".to_string()));
    }
    let user_id = match req.user_id {
        Some(raw) => parse_id(&raw, "user_id")?,
        None => UserId::new(),
    };

    let order_id = simulation.orders.place_order(user_id, req.products).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(OrderPlacedResponse {
            order_id: order_id.to_string(),
            user_id: user_id.to_string(),
        }),
    ))
}

/// PUT /inventory/{good_id} — set stock in the simulated inventory.
#[tracing::instrument(skip(state, req))]
pub async fn set_stock(
    State(state): State<Arc<AppState>>,
    Path(good_id): Path<String>,
    Json(req): Json<SetStockRequest>,
) -> Result<StatusCode, ApiError> {
    let simulation = simulation(&state)?;
    let good_id: GoodId = parse_id(&good_id, "good_id")?;
    if req.unit_price < 0 {
        return Err(ApiError::BadRequest("unit_price must not be negative".to_string()));
    }

    simulation
        .inventory
        .set_stock(good_id, req.available, req.unit_price);
    Ok(StatusCode::NO_CONTENT)
}
