//! Order saga orchestrator.
//!
//! Coordinates order creation, inventory reservation and compensation
//! across services that only talk through the bus:
//!
//! 1. OrderCreated starts a saga and asks inventory to reserve items
//! 2. ProductsReserved moves the saga to INVENTORY_RESERVED
//! 3. ProductsReservationFailed starts compensation: the order is cancelled,
//!    then inventory releases whatever it held
//!
//! The transition table is a pure function ([`transition::decide`]); the
//! [`SagaOrchestrator`] persists each step before publishing its command,
//! and the [`Dispatcher`] feeds it from a subscription on a bounded pool.

pub mod dispatcher;
pub mod error;
pub mod orchestrator;
pub mod participants;
pub mod transition;

pub use dispatcher::{DispatchStats, Dispatcher, DispatcherConfig};
pub use error::{Result, SagaError};
pub use orchestrator::{HandleOutcome, MAX_CONFLICT_RETRIES, MessageHandler, SagaOrchestrator};
pub use participants::{
    InMemoryInventory, InMemoryOrders, OrderStatus, Participant, run_participant,
};
pub use transition::{Command, Decision, Skip, decide};
