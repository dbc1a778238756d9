//! In-memory inventory participant.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bus::{MessageBus, MessageBusExt, Topics};
use common::{GoodId, OrderId};
use contracts::{
    Envelope, EventType, OrderItem, ProductsReservationFailedEvent, ProductsReservedEvent,
    ReleaseInventoryCommand, ReserveItemsCommand,
};
use tracing::info;

use super::Participant;
use crate::Result;

#[derive(Debug, Clone, Copy)]
struct StockLevel {
    available: u32,
    unit_price: i64,
}

#[derive(Debug, Default)]
struct InMemoryInventoryState {
    stock: HashMap<GoodId, StockLevel>,
    reservations: HashMap<OrderId, Vec<OrderItem>>,
}

impl InMemoryInventoryState {
    /// Takes every item or nothing. Returns the order total or the first shortage.
    ///
    /// Lines naming the same good are checked against its stock together.
    fn reserve(&mut self, items: &[OrderItem]) -> std::result::Result<i64, String> {
        let mut requested: Vec<(GoodId, u32)> = Vec::new();
        for item in items {
            match requested.iter_mut().find(|(good_id, _)| *good_id == item.good_id) {
                Some((_, quantity)) => {
                    *quantity = quantity.checked_add(item.quantity).ok_or_else(|| {
                        format!("requested quantity of good {} overflows", item.good_id)
                    })?;
                }
                None => requested.push((item.good_id, item.quantity)),
            }
        }

        for (good_id, quantity) in &requested {
            match self.stock.get(good_id) {
                Some(level) if level.available >= *quantity => {}
                Some(level) => {
                    return Err(format!(
                        "insufficient stock for good {good_id}: requested {quantity}, available {}",
                        level.available
                    ));
                }
                None => return Err(format!("unknown good {good_id}")),
            }
        }
        let total = self
            .total(items)
            .ok_or_else(|| "order total overflows".to_string())?;

        for (good_id, quantity) in requested {
            if let Some(level) = self.stock.get_mut(&good_id) {
                level.available -= quantity;
            }
        }
        Ok(total)
    }

    /// Prices the items at current unit prices. None on overflow.
    fn total(&self, items: &[OrderItem]) -> Option<i64> {
        items.iter().try_fold(0i64, |total, item| {
            let Some(level) = self.stock.get(&item.good_id) else {
                return Some(total);
            };
            level
                .unit_price
                .checked_mul(i64::from(item.quantity))
                .and_then(|line| total.checked_add(line))
        })
    }
}

/// In-memory inventory service.
///
/// Consumes ReserveItems and ReleaseInventory commands and replies on the
/// inventory-replies topic. Reservations are all-or-nothing and keyed by
/// order, so redelivered commands are harmless.
#[derive(Clone)]
pub struct InMemoryInventory<B: MessageBus> {
    bus: B,
    topics: Topics,
    state: Arc<RwLock<InMemoryInventoryState>>,
}

impl<B: MessageBus> InMemoryInventory<B> {
    pub fn new(bus: B, topics: Topics) -> Self {
        Self {
            bus,
            topics,
            state: Arc::default(),
        }
    }

    fn state(&self) -> std::sync::RwLockWriteGuard<'_, InMemoryInventoryState> {
        self.state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Sets the available quantity and unit price of a good.
    pub fn set_stock(&self, good_id: GoodId, available: u32, unit_price: i64) {
        self.state().stock.insert(
            good_id,
            StockLevel {
                available,
                unit_price,
            },
        );
    }

    /// Returns the unreserved quantity of a good.
    pub fn available(&self, good_id: GoodId) -> Option<u32> {
        self.state().stock.get(&good_id).map(|level| level.available)
    }

    /// Returns the number of orders holding a reservation.
    pub fn reservation_count(&self) -> usize {
        self.state().reservations.len()
    }

    /// Returns true if the order holds a reservation.
    pub fn has_reservation(&self, order_id: OrderId) -> bool {
        self.state().reservations.contains_key(&order_id)
    }

    async fn reserve(&self, command: ReserveItemsCommand, envelope: &Envelope) -> Result<()> {
        let outcome = {
            let mut state = self.state();
            if state.reservations.contains_key(&command.order_id) {
                state
                    .total(&command.items)
                    .ok_or_else(|| "order total overflows".to_string())
            } else {
                let outcome = state.reserve(&command.items);
                if outcome.is_ok() {
                    state
                        .reservations
                        .insert(command.order_id, command.items.clone());
                }
                outcome
            }
        };

        let topic = self.topics.for_event_type(EventType::ProductsReserved);
        let key = command.order_id.to_string();
        let trace = envelope.trace_context();

        match outcome {
            Ok(total) => {
                info!(order_id = %command.order_id, total, "items reserved");
                let reply = ProductsReservedEvent {
                    order_id: command.order_id,
                    saga_id: command.saga_id,
                    items: command.items,
                    total_sum: Some(total),
                };
                self.bus.publish(topic, &key, &reply, &trace).await?;
            }
            Err(reason) => {
                info!(order_id = %command.order_id, %reason, "reservation refused");
                let reply = ProductsReservationFailedEvent {
                    order_id: command.order_id,
                    saga_id: command.saga_id,
                    items: command.items,
                    reason: Some(reason),
                };
                self.bus.publish(topic, &key, &reply, &trace).await?;
            }
        }
        Ok(())
    }

    fn release(&self, command: ReleaseInventoryCommand) {
        let mut state = self.state();
        let Some(items) = state.reservations.remove(&command.order_id) else {
            return;
        };
        for item in items {
            if let Some(level) = state.stock.get_mut(&item.good_id) {
                level.available += item.quantity;
            }
        }
        info!(order_id = %command.order_id, "reservation released");
    }
}

#[async_trait]
impl<B: MessageBus> Participant for InMemoryInventory<B> {
    fn name(&self) -> &'static str {
        "inventory"
    }

    fn topics(&self) -> Vec<String> {
        vec![self.topics.inventory_commands.clone()]
    }

    async fn handle(&self, envelope: &Envelope) -> Result<()> {
        match envelope.event_type()? {
            EventType::ReserveItems => self.reserve(envelope.decode()?, envelope).await,
            EventType::ReleaseInventory => {
                self.release(envelope.decode()?);
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use bus::InMemoryBus;
    use common::SagaId;
    use contracts::TraceContext;

    use super::*;

    fn envelope_for<M: contracts::Message>(message: &M) -> Envelope {
        Envelope::for_message("inventory-commands", "k", message, &TraceContext::root()).unwrap()
    }

    fn setup() -> (InMemoryInventory<InMemoryBus>, InMemoryBus, GoodId) {
        let bus = InMemoryBus::new();
        let inventory = InMemoryInventory::new(bus.clone(), Topics::default());
        let good = GoodId::new();
        inventory.set_stock(good, 5, 1000);
        (inventory, bus, good)
    }

    #[tokio::test]
    async fn test_reserve_and_release() {
        let (inventory, bus, good) = setup();
        let order_id = OrderId::new();
        let saga_id = SagaId::new();
        let reserve = ReserveItemsCommand {
            order_id,
            saga_id,
            items: vec![OrderItem::new(good, 2)],
        };

        inventory.handle(&envelope_for(&reserve)).await.unwrap();

        assert_eq!(inventory.available(good), Some(3));
        assert!(inventory.has_reservation(order_id));
        let reply: ProductsReservedEvent = bus.published_on("inventory-replies")[0].decode().unwrap();
        assert_eq!(reply.saga_id, saga_id);
        assert_eq!(reply.total_sum, Some(2000));

        let release = ReleaseInventoryCommand::new(order_id, saga_id);
        inventory.handle(&envelope_for(&release)).await.unwrap();
        inventory.handle(&envelope_for(&release)).await.unwrap();

        assert_eq!(inventory.available(good), Some(5));
        assert_eq!(inventory.reservation_count(), 0);
    }

    #[tokio::test]
    async fn test_shortage_reserves_nothing() {
        let (inventory, bus, good) = setup();
        let other = GoodId::new();
        inventory.set_stock(other, 1, 500);
        let reserve = ReserveItemsCommand {
            order_id: OrderId::new(),
            saga_id: SagaId::new(),
            items: vec![OrderItem::new(good, 2), OrderItem::new(other, 3)],
        };

        inventory.handle(&envelope_for(&reserve)).await.unwrap();

        assert_eq!(inventory.available(good), Some(5));
        assert_eq!(inventory.available(other), Some(1));
        assert_eq!(inventory.reservation_count(), 0);
        let reply = &bus.published_on("inventory-replies")[0];
        assert_eq!(reply.event_type().unwrap(), EventType::ProductsReservationFailed);
    }

    #[tokio::test]
    async fn test_repeated_good_is_checked_against_total_quantity() {
        let (inventory, bus, good) = setup();
        let reserve = ReserveItemsCommand {
            order_id: OrderId::new(),
            saga_id: SagaId::new(),
            items: vec![OrderItem::new(good, 3), OrderItem::new(good, 3)],
        };

        inventory.handle(&envelope_for(&reserve)).await.unwrap();

        assert_eq!(inventory.available(good), Some(5));
        assert_eq!(inventory.reservation_count(), 0);
        let reply: ProductsReservationFailedEvent =
            bus.published_on("inventory-replies")[0].decode().unwrap();
        assert!(reply.reason.unwrap().contains("requested 6, available 5"));
    }

    #[tokio::test]
    async fn test_repeated_good_within_stock_is_reserved_once() {
        let (inventory, bus, good) = setup();
        let reserve = ReserveItemsCommand {
            order_id: OrderId::new(),
            saga_id: SagaId::new(),
            items: vec![OrderItem::new(good, 2), OrderItem::new(good, 3)],
        };

        inventory.handle(&envelope_for(&reserve)).await.unwrap();

        assert_eq!(inventory.available(good), Some(0));
        let reply: ProductsReservedEvent = bus.published_on("inventory-replies")[0].decode().unwrap();
        assert_eq!(reply.total_sum, Some(5000));
    }

    #[tokio::test]
    async fn test_overflowing_total_reserves_nothing() {
        let (inventory, bus, _) = setup();
        let expensive = GoodId::new();
        inventory.set_stock(expensive, 10, i64::MAX);
        let reserve = ReserveItemsCommand {
            order_id: OrderId::new(),
            saga_id: SagaId::new(),
            items: vec![OrderItem::new(expensive, 2)],
        };

        inventory.handle(&envelope_for(&reserve)).await.unwrap();

        assert_eq!(inventory.available(expensive), Some(10));
        assert_eq!(inventory.reservation_count(), 0);
        let reply = &bus.published_on("inventory-replies")[0];
        assert_eq!(reply.event_type().unwrap(), EventType::ProductsReservationFailed);
    }

    #[tokio::test]
    async fn test_redelivered_reserve_is_not_double_counted() {
        let (inventory, bus, good) = setup();
        let reserve = ReserveItemsCommand {
            order_id: OrderId::new(),
            saga_id: SagaId::new(),
            items: vec![OrderItem::new(good, 2)],
        };

        inventory.handle(&envelope_for(&reserve)).await.unwrap();
        inventory.handle(&envelope_for(&reserve)).await.unwrap();

        assert_eq!(inventory.available(good), Some(3));
        let replies = bus.published_on("inventory-replies");
        assert_eq!(replies.len(), 2);
        assert!(replies
            .iter()
            .all(|r| r.event_type().unwrap() == EventType::ProductsReserved));
    }

    #[tokio::test]
    async fn test_reply_carries_causing_trace() {
        let (inventory, bus, good) = setup();
        let reserve = ReserveItemsCommand {
            order_id: OrderId::new(),
            saga_id: SagaId::new(),
            items: vec![OrderItem::new(good, 1)],
        };
        let envelope = envelope_for(&reserve);

        inventory.handle(&envelope).await.unwrap();

        assert_eq!(
            bus.published_on("inventory-replies")[0].trace_context(),
            envelope.trace_context()
        );
    }
}
