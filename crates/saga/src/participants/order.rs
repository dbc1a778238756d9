//! In-memory order participant.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use bus::{MessageBus, MessageBusExt, Topics};
use common::{OrderId, UserId};
use contracts::{
    CancelOrderCommand, Envelope, EventType, OrderCreatedEvent, OrderItem, TraceContext,
};
use tracing::info;

use super::Participant;
use crate::Result;

/// Lifecycle of an order as the order service sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderStatus {
    Placed,
    Cancelled { reason: Option<String> },
}

/// In-memory order service.
///
/// Places orders by publishing OrderCreated, and cancels them when the
/// orchestrator sends CancelOrder.
#[derive(Clone)]
pub struct InMemoryOrders<B: MessageBus> {
    bus: B,
    topics: Topics,
    orders: Arc<RwLock<HashMap<OrderId, OrderStatus>>>,
}

impl<B: MessageBus> InMemoryOrders<B> {
    pub fn new(bus: B, topics: Topics) -> Self {
        Self {
            bus,
            topics,
            orders: Arc::default(),
        }
    }

    /// Records a new order and announces it, starting a fresh trace.
    pub async fn place_order(&self, user_id: UserId, items: Vec<OrderItem>) -> Result<OrderId> {
        let order_id = OrderId::new();
        self.orders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(order_id, OrderStatus::Placed);

        let event = OrderCreatedEvent {
            order_id,
            user_id,
            items,
        };
        self.bus
            .publish(
                &self.topics.order_created,
                &order_id.to_string(),
                &event,
                &TraceContext::root(),
            )
            .await?;

        info!(%order_id, %user_id, "order placed");
        Ok(order_id)
    }

    pub fn status(&self, order_id: OrderId) -> Option<OrderStatus> {
        self.orders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&order_id)
            .cloned()
    }

    fn cancel(&self, command: CancelOrderCommand) {
        let mut orders = self.orders.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(status) = orders.get_mut(&command.order_id) {
            info!(order_id = %command.order_id, reason = ?command.reason, "order cancelled");
            *status = OrderStatus::Cancelled {
                reason: command.reason,
            };
        }
    }
}

#[async_trait]
impl<B: MessageBus> Participant for InMemoryOrders<B> {
    fn name(&self) -> &'static str {
        "orders"
    }

    fn topics(&self) -> Vec<String> {
        vec![self.topics.saga_replies.clone()]
    }

    async fn handle(&self, envelope: &Envelope) -> Result<()> {
        if envelope.event_type()? == EventType::CancelOrder {
            self.cancel(envelope.decode()?);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bus::InMemoryBus;
    use common::{GoodId, SagaId};

    use super::*;

    #[tokio::test]
    async fn test_place_order_publishes_order_created() {
        let bus = InMemoryBus::new();
        let orders = InMemoryOrders::new(bus.clone(), Topics::default());
        let user_id = UserId::new();
        let items = vec![OrderItem::new(GoodId::new(), 2)];

        let order_id = orders.place_order(user_id, items.clone()).await.unwrap();

        assert_eq!(orders.status(order_id), Some(OrderStatus::Placed));
        let published = bus.published_on("order-created");
        assert_eq!(published.len(), 1);
        assert!(published[0].trace_context().trace_id().is_some());
        let event: OrderCreatedEvent = published[0].decode().unwrap();
        assert_eq!(event.user_id, user_id);
        assert_eq!(event.items, items);
    }

    #[tokio::test]
    async fn test_cancel_order() {
        let bus = InMemoryBus::new();
        let orders = InMemoryOrders::new(bus.clone(), Topics::default());
        let order_id = orders.place_order(UserId::new(), vec![]).await.unwrap();
        let command =
            CancelOrderCommand::new(order_id, SagaId::new(), Some("insufficient stock".into()));
        let envelope =
            Envelope::for_message("saga-replies", "k", &command, &TraceContext::new()).unwrap();

        orders.handle(&envelope).await.unwrap();

        assert_eq!(
            orders.status(order_id),
            Some(OrderStatus::Cancelled {
                reason: Some("insufficient stock".to_string())
            })
        );
    }
}
