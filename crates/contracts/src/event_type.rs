//! The closed set of message tags carried in the `Event-Type` header.

use std::str::FromStr;

use crate::error::ContractError;

/// Logical type of a bus message.
///
/// Dispatch is an exhaustive match over this enum, so supporting a new tag is
/// a compile-time change rather than a silent default branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// An order was placed; starts a saga.
    OrderCreated,
    /// Inventory reserved every requested item.
    ProductsReserved,
    /// Inventory could not reserve the requested items.
    ProductsReservationFailed,
    /// Payment reply. Recognised, not yet orchestrated.
    PaymentProcessed,
    /// Instructs inventory to reserve items for an order.
    ReserveItems,
    /// Instructs inventory to release an order's reservation.
    ReleaseInventory,
    /// Instructs the order service to cancel an order. Also consumed by the
    /// orchestrator as its compensation trigger.
    CancelOrder,
    /// Requests compensation of an order's saga.
    CompensateOrder,
    /// Best-effort notification that a saga could not be created.
    SagaStartFailed,
}

impl EventType {
    /// Every known tag.
    pub const ALL: [EventType; 9] = [
        EventType::OrderCreated,
        EventType::ProductsReserved,
        EventType::ProductsReservationFailed,
        EventType::PaymentProcessed,
        EventType::ReserveItems,
        EventType::ReleaseInventory,
        EventType::CancelOrder,
        EventType::CompensateOrder,
        EventType::SagaStartFailed,
    ];

    /// Returns the canonical wire tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::OrderCreated => "OrderCreatedEvent",
            EventType::ProductsReserved => "ProductsReservedEvent",
            EventType::ProductsReservationFailed => "ProductsReservationFailedEvent",
            EventType::PaymentProcessed => "PaymentProcessedEvent",
            EventType::ReserveItems => "ReserveItemsCommand",
            EventType::ReleaseInventory => "ReleaseInventoryCommand",
            EventType::CancelOrder => "CancelOrderCommand",
            EventType::CompensateOrder => "CompensateOrderCommand",
            EventType::SagaStartFailed => "StartSagaError",
        }
    }

    /// Resolves a wire tag, accepting the legacy names the inventory and
    /// order services still emit.
    pub fn from_tag(tag: &str) -> Option<Self> {
        let tag = tag.trim();
        if let Some(known) = Self::ALL.into_iter().find(|t| t.as_str() == tag) {
            return Some(known);
        }
        match tag {
            "InventoryReservedEvent" => Some(EventType::ProductsReserved),
            "InventoryReservedEventFailed" => Some(EventType::ProductsReservationFailed),
            "InventoryReserveItemsCommand" => Some(EventType::ReserveItems),
            "OrderCancel" => Some(EventType::CancelOrder),
            _ => None,
        }
    }

    /// Returns true if the orchestrator consumes messages of this type.
    pub fn is_inbound(&self) -> bool {
        matches!(
            self,
            EventType::OrderCreated
                | EventType::ProductsReserved
                | EventType::ProductsReservationFailed
                | EventType::PaymentProcessed
                | EventType::CancelOrder
                | EventType::CompensateOrder
        )
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = ContractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_tag(s).ok_or_else(|| ContractError::UnknownEventType(s.to_string()))
    }
}
