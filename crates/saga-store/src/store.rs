use std::sync::Arc;

use async_trait::async_trait;
use common::{OrderId, SagaId};

use crate::{Result, Saga, StoreError};

/// Core trait for saga store implementations.
///
/// All implementations must be safe for concurrent use by many in-flight
/// handlers (Send + Sync).
#[async_trait]
pub trait SagaStore: Send + Sync {
    /// Inserts a new saga.
    ///
    /// Fails with `Duplicate` if the id exists and `DuplicateOrder` if a saga
    /// was already started for the same order.
    async fn create(&self, saga: &Saga) -> Result<SagaId>;

    /// Retrieves a saga by id, or `NotFound`.
    async fn get(&self, id: SagaId) -> Result<Saga>;

    /// Retrieves the saga started for an order, if any.
    async fn find_by_order(&self, order_id: OrderId) -> Result<Option<Saga>>;

    /// Replaces the mutable fields of a saga.
    ///
    /// The stored version must equal `saga.version()`; otherwise the update
    /// fails with `VersionConflict`. An update matching no saga is
    /// `NotFound`, never a silent success. Returns the saga at its new
    /// version.
    async fn update(&self, saga: &Saga) -> Result<Saga>;
}

/// Extension trait providing convenience methods for saga stores.
#[async_trait]
pub trait SagaStoreExt: SagaStore {
    /// Retrieves a saga by id, mapping `NotFound` to `None`.
    async fn find(&self, id: SagaId) -> Result<Option<Saga>> {
        match self.get(id).await {
            Ok(saga) => Ok(Some(saga)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

// Blanket implementation for all SagaStore implementations
impl<T: SagaStore + ?Sized> SagaStoreExt for T {}

#[async_trait]
impl<T: SagaStore + ?Sized> SagaStore for Arc<T> {
    async fn create(&self, saga: &Saga) -> Result<SagaId> {
        (**self).create(saga).await
    }

    async fn get(&self, id: SagaId) -> Result<Saga> {
        (**self).get(id).await
    }

    async fn find_by_order(&self, order_id: OrderId) -> Result<Option<Saga>> {
        (**self).find_by_order(order_id).await
    }

    async fn update(&self, saga: &Saga) -> Result<Saga> {
        (**self).update(saga).await
    }
}
