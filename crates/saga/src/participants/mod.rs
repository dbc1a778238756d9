//! Simulated saga participants.
//!
//! In-process stand-ins for the inventory and order services. They talk to
//! the orchestrator only through the bus, using the same contracts as the
//! real services, so local runs and end-to-end tests exercise the full
//! message flow.

pub mod inventory;
pub mod order;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use bus::{BusError, Subscription};
use contracts::Envelope;
use tracing::{debug, warn};

use crate::Result;

pub use inventory::InMemoryInventory;
pub use order::{InMemoryOrders, OrderStatus};

/// A service that reacts to saga commands on the bus.
#[async_trait]
pub trait Participant: Send + Sync {
    /// Returns the name of this participant. Also its consumer group.
    fn name(&self) -> &'static str;

    /// Topics this participant consumes.
    fn topics(&self) -> Vec<String>;

    /// Handles one envelope. Messages not addressed to the participant are ignored.
    async fn handle(&self, envelope: &Envelope) -> Result<()>;
}

/// Feeds a participant from its subscription until `shutdown` resolves.
///
/// Handles messages one at a time; failures are logged and skipped.
pub async fn run_participant<P: Participant + ?Sized>(
    participant: &P,
    mut subscription: Box<dyn Subscription>,
    poll_timeout: Duration,
    shutdown: impl Future<Output = ()>,
) {
    tokio::pin!(shutdown);

    loop {
        let received = tokio::select! {
            _ = &mut shutdown => break,
            received = subscription.recv(poll_timeout) => received,
        };

        match received {
            Ok(envelope) => {
                if let Err(e) = participant.handle(&envelope).await {
                    warn!(participant = participant.name(), error = %e, "participant failed to handle message");
                }
            }
            Err(BusError::Timeout) => continue,
            Err(e) if e.is_fatal() => break,
            Err(e) => warn!(participant = participant.name(), error = %e, "participant receive failed"),
        }
    }

    debug!(participant = participant.name(), "participant stopped");
}
