//! Saga inspection endpoints.
//!
//! Read-only: sagas only move in response to bus messages. These endpoints
//! are how an operator finds a saga stuck at a non-terminal step.

use std::str::FromStr;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use chrono::{DateTime, Utc};
use common::{OrderId, SagaId};
use saga_store::Saga;
use serde::Serialize;

use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Serialize)]
pub struct SagaResponse {
    pub saga_id: String,
    pub order_id: String,
    pub user_id: String,
    pub current_step: String,
    pub finished: bool,
    pub error_reason: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Saga> for SagaResponse {
    fn from(saga: &Saga) -> Self {
        Self {
            saga_id: saga.id().to_string(),
            order_id: saga.order_id().to_string(),
            user_id: saga.user_id().to_string(),
            current_step: saga.current_step().to_string(),
            finished: saga.is_finished(),
            error_reason: saga.error_reason().map(String::from),
            version: saga.version(),
            created_at: saga.created_at(),
            updated_at: saga.updated_at(),
        }
    }
}

/// GET /sagas/{saga_id} — load a saga by id.
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(saga_id): Path<String>,
) -> Result<Json<SagaResponse>, ApiError> {
    let saga_id: SagaId = parse_id(&saga_id, "saga_id")?;

    let saga = state.store.get(saga_id).await.map_err(|e| match e {
        saga_store::StoreError::NotFound(id) => ApiError::NotFound(format!("Saga {id} not found")),
        other => ApiError::from(other),
    })?;

    Ok(Json(SagaResponse::from(&saga)))
}

/// GET /orders/{order_id}/saga — load the saga driving an order.
#[tracing::instrument(skip(state))]
pub async fn by_order(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
) -> Result<Json<SagaResponse>, ApiError> {
    let order_id: OrderId = parse_id(&order_id, "order_id")?;

    let saga = state
        .store
        .find_by_order(order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No saga for order {order_id}")))?;

    Ok(Json(SagaResponse::from(&saga)))
}

pub(crate) fn parse_id<T>(raw: &str, field: &str) -> Result<T, ApiError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid {field}: {e}")))
}
