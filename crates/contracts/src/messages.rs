//! Event and command payloads.

use common::{GoodId, OrderId, SagaId, UserId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ContractError, Result};
use crate::event_type::EventType;

/// A typed payload bound to exactly one [`EventType`].
pub trait Message: Serialize + DeserializeOwned + Send + Sync {
    /// The tag written to the `Event-Type` header.
    const EVENT_TYPE: EventType;

    /// The order this message belongs to. Used as the partition key.
    fn order_id(&self) -> OrderId;

    /// Partition key for the bus.
    fn partition_key(&self) -> String {
        self.order_id().to_string()
    }
}

/// A line of an order: which good, and how many.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    #[serde(rename = "product_id")]
    pub good_id: GoodId,
    pub quantity: u32,
}

impl OrderItem {
    pub fn new(good_id: GoodId, quantity: u32) -> Self {
        Self { good_id, quantity }
    }
}

/// Emitted by the order service when an order is placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCreatedEvent {
    pub order_id: OrderId,
    pub user_id: UserId,
    #[serde(rename = "products", default)]
    pub items: Vec<OrderItem>,
}

/// Instructs inventory to reserve an order's items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveItemsCommand {
    pub order_id: OrderId,
    pub saga_id: SagaId,
    #[serde(rename = "products")]
    pub items: Vec<OrderItem>,
}

/// Inventory reserved every requested item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductsReservedEvent {
    pub order_id: OrderId,
    pub saga_id: SagaId,
    #[serde(rename = "products", default)]
    pub items: Vec<OrderItem>,
    /// Order total in minor currency units, when inventory priced the items.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_sum: Option<i64>,
}

/// Inventory could not reserve the requested items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductsReservationFailedEvent {
    pub order_id: OrderId,
    pub saga_id: SagaId,
    #[serde(rename = "products", default)]
    pub items: Vec<OrderItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Instructs the order service to cancel an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOrderCommand {
    pub order_id: OrderId,
    pub saga_id: SagaId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CancelOrderCommand {
    pub fn new(order_id: OrderId, saga_id: SagaId, reason: Option<String>) -> Self {
        Self {
            order_id,
            saga_id,
            reason,
        }
    }
}

/// Requests compensation of an order's saga.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensateOrderCommand {
    pub order_id: OrderId,
    pub saga_id: SagaId,
}

/// Instructs inventory to release whatever it reserved for an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseInventoryCommand {
    pub order_id: OrderId,
    pub saga_id: SagaId,
}

impl ReleaseInventoryCommand {
    pub fn new(order_id: OrderId, saga_id: SagaId) -> Self {
        Self { order_id, saga_id }
    }
}

/// Payment reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentProcessedEvent {
    pub order_id: OrderId,
    pub saga_id: SagaId,
}

/// Notification that a saga could not be created for an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaStartFailedEvent {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub reason: String,
}

macro_rules! impl_message {
    ($($ty:ty => $event_type:expr),* $(,)?) => {
        $(
            impl Message for $ty {
                const EVENT_TYPE: EventType = $event_type;

                fn order_id(&self) -> OrderId {
                    self.order_id
                }
            }
        )*
    };
}

impl_message! {
    OrderCreatedEvent => EventType::OrderCreated,
    ReserveItemsCommand => EventType::ReserveItems,
    ProductsReservedEvent => EventType::ProductsReserved,
    ProductsReservationFailedEvent => EventType::ProductsReservationFailed,
    CancelOrderCommand => EventType::CancelOrder,
    CompensateOrderCommand => EventType::CompensateOrder,
    ReleaseInventoryCommand => EventType::ReleaseInventory,
    PaymentProcessedEvent => EventType::PaymentProcessed,
    SagaStartFailedEvent => EventType::SagaStartFailed,
}

/// Every message the orchestrator consumes, decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    OrderCreated(OrderCreatedEvent),
    ProductsReserved(ProductsReservedEvent),
    ProductsReservationFailed(ProductsReservationFailedEvent),
    PaymentProcessed(PaymentProcessedEvent),
    CancelOrder(CancelOrderCommand),
    CompensateOrder(CompensateOrderCommand),
}

impl InboundMessage {
    /// Decodes a payload according to its tag.
    ///
    /// Outbound-only tags and malformed bodies are poison.
    pub fn decode(event_type: EventType, payload: &[u8]) -> Result<Self> {
        fn parse<M: Message>(payload: &[u8]) -> Result<M> {
            serde_json::from_slice(payload).map_err(|source| ContractError::Malformed {
                event_type: M::EVENT_TYPE,
                source,
            })
        }

        match event_type {
            EventType::OrderCreated => parse(payload).map(InboundMessage::OrderCreated),
            EventType::ProductsReserved => parse(payload).map(InboundMessage::ProductsReserved),
            EventType::ProductsReservationFailed => {
                parse(payload).map(InboundMessage::ProductsReservationFailed)
            }
            EventType::PaymentProcessed => parse(payload).map(InboundMessage::PaymentProcessed),
            EventType::CancelOrder => parse(payload).map(InboundMessage::CancelOrder),
            EventType::CompensateOrder => parse(payload).map(InboundMessage::CompensateOrder),
            EventType::ReserveItems | EventType::ReleaseInventory | EventType::SagaStartFailed => {
                Err(ContractError::NotInbound(event_type))
            }
        }
    }

    pub fn event_type(&self) -> EventType {
        match self {
            InboundMessage::OrderCreated(_) => EventType::OrderCreated,
            InboundMessage::ProductsReserved(_) => EventType::ProductsReserved,
            InboundMessage::ProductsReservationFailed(_) => EventType::ProductsReservationFailed,
            InboundMessage::PaymentProcessed(_) => EventType::PaymentProcessed,
            InboundMessage::CancelOrder(_) => EventType::CancelOrder,
            InboundMessage::CompensateOrder(_) => EventType::CompensateOrder,
        }
    }

    pub fn order_id(&self) -> OrderId {
        match self {
            InboundMessage::OrderCreated(m) => m.order_id,
            InboundMessage::ProductsReserved(m) => m.order_id,
            InboundMessage::ProductsReservationFailed(m) => m.order_id,
            InboundMessage::PaymentProcessed(m) => m.order_id,
            InboundMessage::CancelOrder(m) => m.order_id,
            InboundMessage::CompensateOrder(m) => m.order_id,
        }
    }

    /// The saga this message refers to. `None` for the initiating event.
    pub fn saga_id(&self) -> Option<SagaId> {
        match self {
            InboundMessage::OrderCreated(_) => None,
            InboundMessage::ProductsReserved(m) => Some(m.saga_id),
            InboundMessage::ProductsReservationFailed(m) => Some(m.saga_id),
            InboundMessage::PaymentProcessed(m) => Some(m.saga_id),
            InboundMessage::CancelOrder(m) => Some(m.saga_id),
            InboundMessage::CompensateOrder(m) => Some(m.saga_id),
        }
    }
}
