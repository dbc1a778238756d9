//! Saga orchestrator.

use async_trait::async_trait;
use bus::{MessageBus, MessageBusExt, Topics};
use common::SagaId;
use contracts::{
    CancelOrderCommand, InboundMessage, Message, OrderCreatedEvent, ReleaseInventoryCommand,
    ReserveItemsCommand, SagaStartFailedEvent, TraceContext,
};
use saga_store::{Saga, SagaStep, SagaStore, StoreError};
use tracing::{debug, error, info, warn};

use crate::error::{Result, SagaError};
use crate::transition::{Command, Decision, Skip, decide};

/// How many times a transition is re-read and re-decided after a version conflict.
pub const MAX_CONFLICT_RETRIES: u32 = 3;

/// What handling one message did to its saga.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    /// A new saga was created.
    Started { saga_id: SagaId },
    /// The saga moved to a new step.
    Advanced {
        saga_id: SagaId,
        from: SagaStep,
        to: SagaStep,
    },
    /// The saga was already at the target step; its command was re-published.
    Redriven { saga_id: SagaId, step: SagaStep },
    /// The saga was left alone.
    Ignored { saga_id: SagaId, reason: Skip },
}

/// Anything the dispatch loop can hand a decoded message to.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, message: InboundMessage, trace: TraceContext) -> Result<HandleOutcome>;
}

/// Drives order sagas from inbound events.
///
/// Every transition is persisted before the command it triggers is
/// published, so a crash in between is recovered by redelivery re-driving
/// the persisted step.
pub struct SagaOrchestrator<S, B>
where
    S: SagaStore,
    B: MessageBus,
{
    store: S,
    bus: B,
    topics: Topics,
}

impl<S, B> SagaOrchestrator<S, B>
where
    S: SagaStore,
    B: MessageBus,
{
    /// Creates a new orchestrator.
    pub fn new(store: S, bus: B, topics: Topics) -> Self {
        Self { store, bus, topics }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Applies one inbound message to its saga.
    #[tracing::instrument(
        skip(self, message, trace),
        fields(
            event_type = %message.event_type(),
            order_id = %message.order_id(),
            saga_id = ?message.saga_id(),
            trace_id = ?trace.trace_id(),
        )
    )]
    pub async fn handle_message(
        &self,
        message: InboundMessage,
        trace: &TraceContext,
    ) -> Result<HandleOutcome> {
        if let InboundMessage::OrderCreated(event) = &message {
            return self.start_saga(event, trace).await;
        }

        let saga_id = message
            .saga_id()
            .ok_or(SagaError::MissingSagaId(message.event_type()))?;
        self.apply_reply(saga_id, &message, trace).await
    }

    /// Creates the saga for a new order and asks inventory to reserve its items.
    async fn start_saga(
        &self,
        event: &OrderCreatedEvent,
        trace: &TraceContext,
    ) -> Result<HandleOutcome> {
        let message = InboundMessage::OrderCreated(event.clone());

        let existing = match self.store.find_by_order(event.order_id).await {
            Ok(existing) => existing,
            Err(e) => return Err(self.start_failed(event, e.into(), trace).await),
        };
        if let Some(saga) = existing {
            warn!(saga_id = %saga.id(), step = %saga.current_step(), "duplicate OrderCreated");
            return self.apply_decision(saga, &message, trace).await;
        }

        let saga = Saga::start(event.order_id, event.user_id);
        match self.store.create(&saga).await {
            Ok(_) => {}
            Err(StoreError::DuplicateOrder(order_id)) => {
                // Lost a race with a concurrent delivery of the same event
                let saga = self
                    .store
                    .find_by_order(order_id)
                    .await?
                    .ok_or(SagaError::DuplicateSaga(order_id))?;
                return self.apply_decision(saga, &message, trace).await;
            }
            Err(e) => return Err(self.start_failed(event, e.into(), trace).await),
        }

        metrics::counter!("sagas_started_total").increment(1);
        info!(saga_id = %saga.id(), user_id = %event.user_id, "saga started");

        self.publish(&saga, Command::ReserveItems(event.items.clone()), trace)
            .await?;
        Ok(HandleOutcome::Started { saga_id: saga.id() })
    }

    /// Sends the best-effort notification that no saga could be created.
    async fn start_failed(
        &self,
        event: &OrderCreatedEvent,
        err: SagaError,
        trace: &TraceContext,
    ) -> SagaError {
        error!(error = %err, "failed to create saga");

        let notification = SagaStartFailedEvent {
            order_id: event.order_id,
            user_id: event.user_id,
            reason: err.to_string(),
        };
        if let Err(e) = self
            .bus
            .publish(
                &self.topics.notifications,
                &notification.partition_key(),
                &notification,
                trace,
            )
            .await
        {
            warn!(error = %e, "failed to publish saga start failure notification");
        }

        err
    }

    /// Applies a reply to an established saga, re-reading on version conflicts.
    async fn apply_reply(
        &self,
        saga_id: SagaId,
        message: &InboundMessage,
        trace: &TraceContext,
    ) -> Result<HandleOutcome> {
        for attempt in 1..=MAX_CONFLICT_RETRIES {
            let saga = self.store.get(saga_id).await?;
            if saga.order_id() != message.order_id() {
                return Err(SagaError::OrderMismatch {
                    saga_id,
                    expected: saga.order_id(),
                    actual: message.order_id(),
                });
            }

            match self.apply_decision(saga, message, trace).await {
                Err(SagaError::Store(e)) if e.is_conflict() => {
                    metrics::counter!("saga_version_conflicts_total").increment(1);
                    debug!(attempt, error = %e, "version conflict, re-reading saga");
                }
                other => return other,
            }
        }

        Err(SagaError::ConcurrencyExhausted {
            saga_id,
            attempts: MAX_CONFLICT_RETRIES,
        })
    }

    async fn apply_decision(
        &self,
        mut saga: Saga,
        message: &InboundMessage,
        trace: &TraceContext,
    ) -> Result<HandleOutcome> {
        let from = saga.current_step();

        match decide(from, saga.error_reason(), message) {
            Decision::Advance {
                to,
                error_reason,
                emit,
            } => {
                saga.transition_to(to)?;
                if let Some(reason) = error_reason {
                    saga.set_error_reason(reason);
                }
                let saga = self.store.update(&saga).await?;

                metrics::counter!("saga_transitions_total", "step" => to.as_str()).increment(1);
                if to == SagaStep::Compensated {
                    metrics::counter!("sagas_compensated_total").increment(1);
                }
                info!(saga_id = %saga.id(), %from, %to, "saga advanced");

                if let Some(command) = emit {
                    self.publish(&saga, command, trace).await?;
                }
                Ok(HandleOutcome::Advanced {
                    saga_id: saga.id(),
                    from,
                    to,
                })
            }
            Decision::Redrive { emit } => {
                debug!(saga_id = %saga.id(), step = %from, "saga already at target step");
                if let Some(command) = emit {
                    self.publish(&saga, command, trace).await?;
                }
                Ok(HandleOutcome::Redriven {
                    saga_id: saga.id(),
                    step: from,
                })
            }
            Decision::Ignore(reason) => {
                metrics::counter!("saga_messages_ignored_total", "reason" => reason.as_str())
                    .increment(1);
                match reason {
                    Skip::Unsupported(event_type) => {
                        warn!(saga_id = %saga.id(), %event_type, "no transition for message, dropping")
                    }
                    _ => info!(saga_id = %saga.id(), step = %from, ?reason, "message ignored"),
                }
                Ok(HandleOutcome::Ignored {
                    saga_id: saga.id(),
                    reason,
                })
            }
        }
    }

    /// Publishes a command for `saga` on its routed topic, keyed by order id.
    async fn publish(&self, saga: &Saga, command: Command, trace: &TraceContext) -> Result<()> {
        let event_type = command.event_type();
        let topic = self.topics.for_event_type(event_type);
        let key = saga.order_id().to_string();

        let result = match command {
            Command::ReserveItems(items) => {
                let message = ReserveItemsCommand {
                    order_id: saga.order_id(),
                    saga_id: saga.id(),
                    items,
                };
                self.bus.publish(topic, &key, &message, trace).await
            }
            Command::CancelOrder { reason } => {
                let message = CancelOrderCommand::new(saga.order_id(), saga.id(), reason);
                self.bus.publish(topic, &key, &message, trace).await
            }
            Command::ReleaseInventory => {
                let message = ReleaseInventoryCommand::new(saga.order_id(), saga.id());
                self.bus.publish(topic, &key, &message, trace).await
            }
        };

        result.map_err(|source| {
            metrics::counter!("saga_publish_failures_total").increment(1);
            error!(
                saga_id = %saga.id(),
                step = %saga.current_step(),
                %event_type,
                error = %source,
                "saga step persisted but command not published"
            );
            SagaError::Publish { event_type, source }
        })
    }
}

#[async_trait]
impl<S, B> MessageHandler for SagaOrchestrator<S, B>
where
    S: SagaStore + 'static,
    B: MessageBus + 'static,
{
    async fn handle(&self, message: InboundMessage, trace: TraceContext) -> Result<HandleOutcome> {
        self.handle_message(message, &trace).await
    }
}
