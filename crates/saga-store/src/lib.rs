//! Saga store for the order saga orchestrator.
//!
//! Persists one [`Saga`] record per order: its current step, correlation
//! ids, error reason and timestamps. Updates are guarded by an
//! optimistic-concurrency version so concurrent handlers for one saga
//! cannot silently overwrite each other.
//!
//! Implementations:
//! - [`InMemorySagaStore`]: for tests and single-process runs
//! - [`PostgresSagaStore`]: backed by the `sagas` table in `/migrations`

pub mod error;
pub mod memory;
pub mod postgres;
pub mod saga;
pub mod step;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::InMemorySagaStore;
pub use postgres::PostgresSagaStore;
pub use saga::{Saga, SagaParts};
pub use step::{InvalidTransition, SagaStep, UnknownStep};
pub use store::{SagaStore, SagaStoreExt};
