use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{OrderId, SagaId};
use tokio::sync::RwLock;

use crate::{Result, Saga, SagaStore, StoreError};

#[derive(Debug, Default)]
struct InMemoryState {
    sagas: HashMap<SagaId, Saga>,
    by_order: HashMap<OrderId, SagaId>,
    fail_on_create: bool,
    fail_on_update: bool,
    fail_on_read: bool,
}

/// In-memory saga store implementation for testing and single-process runs.
///
/// Enforces the same uniqueness and version rules as the PostgreSQL store.
#[derive(Debug, Clone, Default)]
pub struct InMemorySagaStore {
    state: Arc<RwLock<InMemoryState>>,
}

impl InMemorySagaStore {
    /// Creates a new empty in-memory saga store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of sagas stored.
    pub async fn saga_count(&self) -> usize {
        self.state.read().await.sagas.len()
    }

    /// Returns every stored saga.
    pub async fn all(&self) -> Vec<Saga> {
        self.state.read().await.sagas.values().cloned().collect()
    }

    /// Configures the store to fail every `create`.
    pub async fn set_fail_on_create(&self, fail: bool) {
        self.state.write().await.fail_on_create = fail;
    }

    /// Configures the store to fail every `update`.
    pub async fn set_fail_on_update(&self, fail: bool) {
        self.state.write().await.fail_on_update = fail;
    }

    /// Configures the store to fail every `get` and `find_by_order`.
    pub async fn set_fail_on_read(&self, fail: bool) {
        self.state.write().await.fail_on_read = fail;
    }

    /// Clears all sagas.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.sagas.clear();
        state.by_order.clear();
    }
}

fn injected(operation: &str) -> StoreError {
    StoreError::Unavailable(format!("{operation} failure injected"))
}

#[async_trait]
impl SagaStore for InMemorySagaStore {
    async fn create(&self, saga: &Saga) -> Result<SagaId> {
        let mut state = self.state.write().await;
        if state.fail_on_create {
            return Err(injected("create"));
        }
        if state.sagas.contains_key(&saga.id()) {
            return Err(StoreError::Duplicate(saga.id()));
        }
        if state.by_order.contains_key(&saga.order_id()) {
            return Err(StoreError::DuplicateOrder(saga.order_id()));
        }

        state.by_order.insert(saga.order_id(), saga.id());
        state.sagas.insert(saga.id(), saga.clone());
        Ok(saga.id())
    }

    async fn get(&self, id: SagaId) -> Result<Saga> {
        let state = self.state.read().await;
        if state.fail_on_read {
            return Err(injected("read"));
        }
        state.sagas.get(&id).cloned().ok_or(StoreError::NotFound(id))
    }

    async fn find_by_order(&self, order_id: OrderId) -> Result<Option<Saga>> {
        let state = self.state.read().await;
        if state.fail_on_read {
            return Err(injected("read"));
        }
        Ok(state
            .by_order
            .get(&order_id)
            .and_then(|id| state.sagas.get(id))
            .cloned())
    }

    async fn update(&self, saga: &Saga) -> Result<Saga> {
        let mut state = self.state.write().await;
        if state.fail_on_update {
            return Err(injected("update"));
        }

        let stored = state
            .sagas
            .get_mut(&saga.id())
            .ok_or(StoreError::NotFound(saga.id()))?;
        if stored.version() != saga.version() {
            return Err(StoreError::VersionConflict {
                saga_id: saga.id(),
                expected: saga.version(),
                actual: stored.version(),
            });
        }

        let mut updated = saga.clone();
        updated.set_version(saga.version() + 1);
        *stored = updated.clone();
        Ok(updated)
    }
}
