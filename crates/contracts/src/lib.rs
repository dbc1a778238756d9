//! Wire contracts for the order saga.
//!
//! Every message on the bus is an [`Envelope`]: a serialized payload plus
//! string headers. The `Event-Type` header selects the payload schema and the
//! handler; every other header is part of the [`TraceContext`] carrier and is
//! copied onto each message produced while handling it.

pub mod envelope;
pub mod error;
pub mod event_type;
pub mod messages;
pub mod trace;

pub use envelope::{EVENT_TYPE_HEADER, Envelope, EnvelopeBuilder};
pub use error::{ContractError, Result};
pub use event_type::EventType;
pub use messages::{
    CancelOrderCommand, CompensateOrderCommand, InboundMessage, Message, OrderCreatedEvent,
    OrderItem, PaymentProcessedEvent, ProductsReservationFailedEvent, ProductsReservedEvent,
    ReleaseInventoryCommand, ReserveItemsCommand, SagaStartFailedEvent,
};
pub use trace::TraceContext;
