//! Topic names. Configuration, not fixed by the orchestrator.

use contracts::EventType;

/// Topic names for each message family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    /// OrderCreated events from the order service.
    pub order_created: String,
    /// Commands addressed to inventory.
    pub inventory_commands: String,
    /// Replies from inventory.
    pub inventory_replies: String,
    /// Saga-level commands: cancellation, compensation, payment replies.
    pub saga_replies: String,
    /// Best-effort notifications about sagas that failed to start.
    pub notifications: String,
}

impl Topics {
    /// Returns the topic a message of the given type is published to.
    pub fn for_event_type(&self, event_type: EventType) -> &str {
        match event_type {
            EventType::OrderCreated => &self.order_created,
            EventType::ReserveItems | EventType::ReleaseInventory => &self.inventory_commands,
            EventType::ProductsReserved | EventType::ProductsReservationFailed => {
                &self.inventory_replies
            }
            EventType::CancelOrder | EventType::CompensateOrder | EventType::PaymentProcessed => {
                &self.saga_replies
            }
            EventType::SagaStartFailed => &self.notifications,
        }
    }

    /// Topics the orchestrator consumes.
    pub fn orchestrator_inputs(&self) -> Vec<String> {
        vec![
            self.order_created.clone(),
            self.inventory_replies.clone(),
            self.saga_replies.clone(),
        ]
    }
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            order_created: "order-created".to_string(),
            inventory_commands: "inventory-commands".to_string(),
            inventory_replies: "inventory-replies".to_string(),
            saga_replies: "saga-replies".to_string(),
            notifications: "saga-notifications".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_inbound_type_reaches_an_orchestrator_input() {
        let topics = Topics::default();
        let inputs = topics.orchestrator_inputs();

        for event_type in EventType::ALL.into_iter().filter(EventType::is_inbound) {
            let topic = topics.for_event_type(event_type);
            assert!(
                inputs.iter().any(|t| t == topic),
                "{event_type} is routed to {topic}, which the orchestrator does not consume"
            );
        }
    }

    #[test]
    fn inventory_commands_share_a_topic() {
        let topics = Topics::default();
        assert_eq!(
            topics.for_event_type(EventType::ReserveItems),
            topics.for_event_type(EventType::ReleaseInventory)
        );
        assert_eq!(topics.for_event_type(EventType::SagaStartFailed), "saga-notifications");
    }
}
