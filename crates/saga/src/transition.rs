//! The saga transition table.
//!
//! A pure function of (current step, inbound message) to a [`Decision`].
//! Persisting the new step and publishing the command are the
//! orchestrator's job.
//!
//! | trigger                        | from                   | to                   | emits            |
//! |--------------------------------|------------------------|----------------------|------------------|
//! | OrderCreatedEvent              | (no saga)              | ORDER_CREATED        | ReserveItems     |
//! | ProductsReservedEvent          | ORDER_CREATED          | INVENTORY_RESERVED   | nothing          |
//! | ProductsReservationFailedEvent | forward step           | COMPENSATING         | CancelOrder      |
//! | CancelOrderCommand             | any non-terminal       | COMPENSATED          | ReleaseInventory |
//! | CompensateOrderCommand         | any non-terminal       | COMPENSATED          | ReleaseInventory |

use contracts::{EventType, InboundMessage, OrderItem};
use saga_store::SagaStep;

/// Default reason recorded when a reservation failure carries none.
pub const RESERVATION_FAILED: &str = "inventory reservation failed";

/// A command the orchestrator publishes after a decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    ReserveItems(Vec<OrderItem>),
    CancelOrder { reason: Option<String> },
    ReleaseInventory,
}

impl Command {
    pub fn event_type(&self) -> EventType {
        match self {
            Command::ReserveItems(_) => EventType::ReserveItems,
            Command::CancelOrder { .. } => EventType::CancelOrder,
            Command::ReleaseInventory => EventType::ReleaseInventory,
        }
    }
}

/// Why a message left the saga untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    /// The message would move the saga backwards or sideways.
    OutOfOrder { current: SagaStep, target: SagaStep },
    /// The saga already finished.
    Finished(SagaStep),
    /// The message type has no transition yet.
    Unsupported(EventType),
}

impl Skip {
    /// Short label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Skip::OutOfOrder { .. } => "out_of_order",
            Skip::Finished(_) => "finished",
            Skip::Unsupported(_) => "unsupported",
        }
    }
}

/// Outcome of applying a message to a saga's current step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Persist the move to `to`, then publish `emit`.
    Advance {
        to: SagaStep,
        error_reason: Option<String>,
        emit: Option<Command>,
    },
    /// The saga is already at the target step: persist nothing and publish
    /// the step's command again.
    Redrive { emit: Option<Command> },
    /// Leave the saga alone.
    Ignore(Skip),
}

/// The step a message drives the saga to, and the command that step emits.
fn target(message: &InboundMessage) -> Option<(SagaStep, Option<Command>, Option<String>)> {
    match message {
        InboundMessage::OrderCreated(event) => Some((
            SagaStep::OrderCreated,
            Some(Command::ReserveItems(event.items.clone())),
            None,
        )),
        InboundMessage::ProductsReserved(_) => Some((SagaStep::InventoryReserved, None, None)),
        InboundMessage::ProductsReservationFailed(event) => {
            let reason = event
                .reason
                .clone()
                .unwrap_or_else(|| RESERVATION_FAILED.to_string());
            Some((
                SagaStep::Compensating,
                Some(Command::CancelOrder {
                    reason: Some(reason.clone()),
                }),
                Some(reason),
            ))
        }
        InboundMessage::CancelOrder(command) => Some((
            SagaStep::Compensated,
            Some(Command::ReleaseInventory),
            Some(
                command
                    .reason
                    .clone()
                    .unwrap_or_else(|| "order cancelled".to_string()),
            ),
        )),
        InboundMessage::CompensateOrder(_) => Some((
            SagaStep::Compensated,
            Some(Command::ReleaseInventory),
            Some("compensation requested".to_string()),
        )),
        InboundMessage::PaymentProcessed(_) => None,
    }
}

/// Decides what `message` does to a saga currently at `current`.
///
/// `existing_reason` is the saga's recorded error reason; it is never
/// overwritten by a later, less specific one.
pub fn decide(current: SagaStep, existing_reason: Option<&str>, message: &InboundMessage) -> Decision {
    let Some((to, emit, reason)) = target(message) else {
        return Decision::Ignore(Skip::Unsupported(message.event_type()));
    };

    if to == current {
        return Decision::Redrive { emit };
    }
    if current.is_terminal() {
        return Decision::Ignore(Skip::Finished(current));
    }
    if !current.can_transition_to(to) {
        return Decision::Ignore(Skip::OutOfOrder {
            current,
            target: to,
        });
    }

    let error_reason = match existing_reason {
        Some(_) => None,
        None => reason,
    };
    Decision::Advance {
        to,
        error_reason,
        emit,
    }
}

#[cfg(test)]
mod tests {
    use common::{GoodId, OrderId, SagaId, UserId};
    use contracts::{
        CancelOrderCommand, CompensateOrderCommand, OrderCreatedEvent, PaymentProcessedEvent,
        ProductsReservationFailedEvent, ProductsReservedEvent,
    };

    use super::*;

    fn order_created(items: Vec<OrderItem>) -> InboundMessage {
        InboundMessage::OrderCreated(OrderCreatedEvent {
            order_id: OrderId::new(),
            user_id: UserId::new(),
            items,
        })
    }

    fn reserved() -> InboundMessage {
        InboundMessage::ProductsReserved(ProductsReservedEvent {
            order_id: OrderId::new(),
            saga_id: SagaId::new(),
            items: vec![],
            total_sum: None,
        })
    }

    fn reservation_failed(reason: Option<&str>) -> InboundMessage {
        InboundMessage::ProductsReservationFailed(ProductsReservationFailedEvent {
            order_id: OrderId::new(),
            saga_id: SagaId::new(),
            items: vec![],
            reason: reason.map(str::to_string),
        })
    }

    fn cancel() -> InboundMessage {
        InboundMessage::CancelOrder(CancelOrderCommand::new(OrderId::new(), SagaId::new(), None))
    }

    fn compensate() -> InboundMessage {
        InboundMessage::CompensateOrder(CompensateOrderCommand {
            order_id: OrderId::new(),
            saga_id: SagaId::new(),
        })
    }

    #[test]
    fn products_reserved_advances_without_command() {
        assert_eq!(
            decide(SagaStep::OrderCreated, None, &reserved()),
            Decision::Advance {
                to: SagaStep::InventoryReserved,
                error_reason: None,
                emit: None,
            }
        );
    }

    #[test]
    fn reservation_failure_starts_compensation() {
        let decision = decide(
            SagaStep::OrderCreated,
            None,
            &reservation_failed(Some("out of stock")),
        );
        assert_eq!(
            decision,
            Decision::Advance {
                to: SagaStep::Compensating,
                error_reason: Some("out of stock".to_string()),
                emit: Some(Command::CancelOrder {
                    reason: Some("out of stock".to_string())
                }),
            }
        );

        let Decision::Advance { error_reason, .. } =
            decide(SagaStep::OrderCreated, None, &reservation_failed(None))
        else {
            panic!("expected Advance");
        };
        assert_eq!(error_reason.as_deref(), Some(RESERVATION_FAILED));
    }

    #[test]
    fn cancel_and_compensate_finish_compensation() {
        for message in [cancel(), compensate()] {
            for current in [SagaStep::OrderCreated, SagaStep::InventoryReserved, SagaStep::Compensating] {
                let decision = decide(current, Some("out of stock"), &message);
                assert_eq!(
                    decision,
                    Decision::Advance {
                        to: SagaStep::Compensated,
                        error_reason: None,
                        emit: Some(Command::ReleaseInventory),
                    }
                );
            }
        }
    }

    #[test]
    fn same_step_redrives_its_command() {
        let items = vec![OrderItem::new(GoodId::new(), 2)];
        assert_eq!(
            decide(SagaStep::OrderCreated, None, &order_created(items.clone())),
            Decision::Redrive {
                emit: Some(Command::ReserveItems(items))
            }
        );
        assert_eq!(
            decide(SagaStep::InventoryReserved, None, &reserved()),
            Decision::Redrive { emit: None }
        );
        assert_eq!(
            decide(SagaStep::Compensated, Some("x"), &cancel()),
            Decision::Redrive {
                emit: Some(Command::ReleaseInventory)
            }
        );
    }

    #[test]
    fn backwards_moves_are_ignored() {
        assert_eq!(
            decide(SagaStep::InventoryReserved, None, &order_created(vec![])),
            Decision::Ignore(Skip::OutOfOrder {
                current: SagaStep::InventoryReserved,
                target: SagaStep::OrderCreated,
            })
        );
        assert_eq!(
            decide(SagaStep::Compensating, Some("x"), &reserved()),
            Decision::Ignore(Skip::OutOfOrder {
                current: SagaStep::Compensating,
                target: SagaStep::InventoryReserved,
            })
        );
    }

    #[test]
    fn finished_sagas_are_ignored() {
        assert_eq!(
            decide(SagaStep::Compensated, Some("x"), &reserved()),
            Decision::Ignore(Skip::Finished(SagaStep::Compensated))
        );
        assert_eq!(
            decide(SagaStep::Completed, None, &reservation_failed(None)),
            Decision::Ignore(Skip::Finished(SagaStep::Completed))
        );
    }

    #[test]
    fn payment_is_unsupported() {
        let message = InboundMessage::PaymentProcessed(PaymentProcessedEvent {
            order_id: OrderId::new(),
            saga_id: SagaId::new(),
        });
        assert_eq!(
            decide(SagaStep::InventoryReserved, None, &message),
            Decision::Ignore(Skip::Unsupported(EventType::PaymentProcessed))
        );
    }
}
