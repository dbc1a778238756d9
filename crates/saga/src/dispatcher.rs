//! Dispatch loop.
//!
//! Receives envelopes from a bus subscription, decodes them, and hands each
//! decodable message to a [`MessageHandler`] on its own task. Handler tasks
//! run on a bounded pool: at most `max_in_flight` at once, each abandoned
//! after `processing_deadline`. The loop reaps task results into logs and
//! metrics and never stops on a handler failure.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bus::{BusError, Subscription};
use common::OrderId;
use contracts::{ContractError, Envelope, EventType, InboundMessage, TraceContext};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::error::{Result, SagaError};
use crate::orchestrator::{HandleOutcome, MessageHandler};

/// Dispatch loop tuning.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// How long one receive waits before polling again.
    pub poll_timeout: Duration,
    /// How long a handler may run before it is abandoned.
    pub processing_deadline: Duration,
    /// Pause after a receive error other than a timeout.
    pub error_backoff: Duration,
    /// Maximum number of concurrently running handlers.
    pub max_in_flight: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(1),
            processing_deadline: Duration::from_secs(30),
            error_backoff: Duration::from_secs(1),
            max_in_flight: 64,
        }
    }
}

/// Totals for one run of the dispatch loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Envelopes received from the bus.
    pub received: u64,
    /// Poison envelopes dropped before reaching a handler.
    pub dropped: u64,
    /// Handlers that returned successfully.
    pub completed: u64,
    /// Handlers that returned an error or panicked.
    pub failed: u64,
    /// Handlers abandoned at the processing deadline.
    pub timed_out: u64,
    /// Receive errors other than timeouts.
    pub receive_errors: u64,
}

/// What one handler task reports back to the loop.
struct TaskReport {
    event_type: EventType,
    order_id: OrderId,
    elapsed: Duration,
    result: std::result::Result<Result<HandleOutcome>, tokio::time::error::Elapsed>,
}

/// Decodes an envelope into a message and its trace carrier.
///
/// Every error is a poison message.
pub fn decode(envelope: &Envelope) -> std::result::Result<(InboundMessage, TraceContext), ContractError> {
    let event_type = envelope.event_type()?;
    let message = InboundMessage::decode(event_type, &envelope.payload)?;
    Ok((message, envelope.trace_context()))
}

fn drop_reason(err: &ContractError) -> &'static str {
    match err {
        ContractError::MissingEventType => "missing_event_type",
        ContractError::UnknownEventType(_) => "unknown_event_type",
        ContractError::NotInbound(_) => "not_inbound",
        _ => "malformed",
    }
}

/// Feeds bus messages to a handler.
///
/// Handlers run on their own tasks, so a slow handler does not delay the
/// next receive. Once `max_in_flight` handlers are running, though, the loop
/// waits for a free slot before receiving again: ingestion stalls while the
/// pool is full.
pub struct Dispatcher<H: MessageHandler> {
    handler: Arc<H>,
    config: DispatcherConfig,
}

impl<H: MessageHandler> Dispatcher<H> {
    pub fn new(handler: Arc<H>, config: DispatcherConfig) -> Self {
        Self { handler, config }
    }

    /// Runs until `shutdown` resolves or the subscription closes, then waits
    /// for in-flight handlers and returns the run's totals.
    #[tracing::instrument(skip_all)]
    pub async fn run(
        &self,
        mut subscription: Box<dyn Subscription>,
        shutdown: impl Future<Output = ()>,
    ) -> DispatchStats {
        tokio::pin!(shutdown);

        let permits = Arc::new(Semaphore::new(self.config.max_in_flight.max(1)));
        let mut tasks: JoinSet<TaskReport> = JoinSet::new();
        let mut stats = DispatchStats::default();

        info!(max_in_flight = self.config.max_in_flight, "dispatch loop started");

        loop {
            while let Some(joined) = tasks.try_join_next() {
                record(joined, &mut stats);
            }

            let received = tokio::select! {
                _ = &mut shutdown => break,
                received = subscription.recv(self.config.poll_timeout) => received,
            };

            let envelope = match received {
                Ok(envelope) => envelope,
                Err(BusError::Timeout) => continue,
                Err(e) if e.is_fatal() => {
                    warn!(error = %e, "subscription closed, stopping dispatch loop");
                    break;
                }
                Err(e) => {
                    stats.receive_errors += 1;
                    metrics::counter!("saga_receive_errors_total").increment(1);
                    error!(error = %e, backoff = ?self.config.error_backoff, "receive failed");
                    tokio::select! {
                        _ = &mut shutdown => break,
                        _ = tokio::time::sleep(self.config.error_backoff) => continue,
                    }
                }
            };

            stats.received += 1;
            let (message, trace) = match decode(&envelope) {
                Ok(decoded) => decoded,
                Err(e) => {
                    stats.dropped += 1;
                    metrics::counter!("saga_messages_dropped_total", "reason" => drop_reason(&e))
                        .increment(1);
                    warn!(
                        topic = %envelope.topic,
                        event_type = ?envelope.event_tag(),
                        error = %e,
                        "dropping poison message"
                    );
                    continue;
                }
            };
            metrics::counter!(
                "saga_messages_received_total",
                "event_type" => message.event_type().as_str()
            )
            .increment(1);

            let permit = tokio::select! {
                _ = &mut shutdown => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let handler = self.handler.clone();
            let deadline = self.config.processing_deadline;
            tasks.spawn(async move {
                let event_type = message.event_type();
                let order_id = message.order_id();
                let started = Instant::now();
                let result = tokio::time::timeout(deadline, handler.handle(message, trace)).await;
                drop(permit);
                TaskReport {
                    event_type,
                    order_id,
                    elapsed: started.elapsed(),
                    result,
                }
            });
        }

        if !tasks.is_empty() {
            info!(in_flight = tasks.len(), "waiting for in-flight handlers");
        }
        while let Some(joined) = tasks.join_next().await {
            record(joined, &mut stats);
        }

        info!(?stats, "dispatch loop stopped");
        stats
    }

    /// Spawns [`run`](Self::run) onto the runtime.
    pub fn spawn(
        self,
        subscription: Box<dyn Subscription>,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> tokio::task::JoinHandle<DispatchStats>
    where
        H: 'static,
    {
        tokio::spawn(async move { self.run(subscription, shutdown).await })
    }
}

fn record(joined: std::result::Result<TaskReport, JoinError>, stats: &mut DispatchStats) {
    let report = match joined {
        Ok(report) => report,
        Err(e) => {
            stats.failed += 1;
            metrics::counter!("saga_handler_results_total", "outcome" => "failed", "category" => "panic")
                .increment(1);
            error!(error = %e, "saga handler panicked");
            return;
        }
    };

    metrics::histogram!("saga_handler_duration_seconds").record(report.elapsed.as_secs_f64());
    let TaskReport {
        event_type,
        order_id,
        ..
    } = report;

    match report.result {
        Ok(Ok(outcome)) => {
            stats.completed += 1;
            metrics::counter!("saga_handler_results_total", "outcome" => "completed").increment(1);
            debug!(%event_type, %order_id, ?outcome, "message handled");
        }
        Ok(Err(e)) => {
            stats.failed += 1;
            let category = e.category();
            metrics::counter!("saga_handler_results_total", "outcome" => "failed", "category" => category)
                .increment(1);
            match e {
                SagaError::SagaNotFound(_) | SagaError::OrderMismatch { .. } => {
                    warn!(%event_type, %order_id, error = %e, category, "message dropped")
                }
                _ => error!(%event_type, %order_id, error = %e, category, "saga handler failed"),
            }
        }
        Err(_) => {
            stats.timed_out += 1;
            metrics::counter!("saga_handler_results_total", "outcome" => "timed_out").increment(1);
            warn!(
                %event_type,
                %order_id,
                elapsed = ?report.elapsed,
                "handler abandoned at deadline, saga state may be partially applied"
            );
        }
    }
}
