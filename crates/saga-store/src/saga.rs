//! The saga record.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use common::{OrderId, SagaId, UserId};
use serde::{Deserialize, Serialize};

use crate::step::{InvalidTransition, SagaStep};

/// Durable progress record of one order's distributed transaction.
///
/// Identifiers are fixed at creation; only the orchestrator moves
/// `current_step`, and every move refreshes `updated_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Saga {
    id: SagaId,
    current_step: SagaStep,
    order_id: OrderId,
    user_id: UserId,
    error_reason: Option<String>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Raw field values for rebuilding a [`Saga`] from storage.
#[derive(Debug, Clone)]
pub struct SagaParts {
    pub id: SagaId,
    pub current_step: SagaStep,
    pub order_id: OrderId,
    pub user_id: UserId,
    pub error_reason: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Current time at the precision PostgreSQL keeps.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

impl Saga {
    /// Version of a freshly created saga.
    pub const INITIAL_VERSION: i64 = 1;

    /// Starts a new saga for an order at [`SagaStep::OrderCreated`].
    pub fn start(order_id: OrderId, user_id: UserId) -> Self {
        let now = now();
        Self {
            id: SagaId::new(),
            current_step: SagaStep::OrderCreated,
            order_id,
            user_id,
            error_reason: None,
            version: Self::INITIAL_VERSION,
            created_at: now,
            updated_at: now,
        }
    }

    /// Rebuilds a saga from stored values.
    pub fn from_parts(parts: SagaParts) -> Self {
        Self {
            id: parts.id,
            current_step: parts.current_step,
            order_id: parts.order_id,
            user_id: parts.user_id,
            error_reason: parts.error_reason,
            version: parts.version,
            created_at: parts.created_at,
            updated_at: parts.updated_at,
        }
    }

    /// Moves the saga to `next`, refreshing `updated_at`.
    ///
    /// `updated_at` strictly increases even when the clock has not moved
    /// since the previous transition.
    pub fn transition_to(&mut self, next: SagaStep) -> Result<(), InvalidTransition> {
        if !self.current_step.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.current_step,
                to: next,
            });
        }

        self.current_step = next;
        self.updated_at = now().max(self.updated_at + Duration::microseconds(1));
        Ok(())
    }

    /// Records why the saga left its forward path.
    pub fn set_error_reason(&mut self, reason: impl Into<String>) {
        self.error_reason = Some(reason.into());
    }

    pub(crate) fn set_version(&mut self, version: i64) {
        self.version = version;
    }
}

// Query methods
impl Saga {
    pub fn id(&self) -> SagaId {
        self.id
    }

    pub fn current_step(&self) -> SagaStep {
        self.current_step
    }

    pub fn order_id(&self) -> OrderId {
        self.order_id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Returns the failure reason, if any.
    pub fn error_reason(&self) -> Option<&str> {
        self.error_reason.as_deref()
    }

    /// Returns the optimistic-concurrency version the saga was read at.
    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns true if the saga has finished.
    pub fn is_finished(&self) -> bool {
        self.current_step.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start() {
        let order_id = OrderId::new();
        let user_id = UserId::new();

        let saga = Saga::start(order_id, user_id);

        assert_eq!(saga.current_step(), SagaStep::OrderCreated);
        assert_eq!(saga.order_id(), order_id);
        assert_eq!(saga.user_id(), user_id);
        assert_eq!(saga.version(), Saga::INITIAL_VERSION);
        assert_eq!(saga.created_at(), saga.updated_at());
        assert!(saga.error_reason().is_none());
        assert!(!saga.is_finished());
    }

    #[test]
    fn test_transition_strictly_advances_updated_at() {
        let mut saga = Saga::start(OrderId::new(), UserId::new());
        let mut previous = saga.updated_at();

        for step in [SagaStep::InventoryReserved, SagaStep::Compensating, SagaStep::Compensated] {
            saga.transition_to(step).unwrap();
            assert_eq!(saga.current_step(), step);
            assert!(saga.updated_at() > previous);
            previous = saga.updated_at();
        }
        assert!(saga.is_finished());
    }

    #[test]
    fn test_invalid_transition_leaves_saga_untouched() {
        let mut saga = Saga::start(OrderId::new(), UserId::new());
        saga.transition_to(SagaStep::InventoryReserved).unwrap();
        let before = saga.clone();

        let err = saga.transition_to(SagaStep::OrderCreated).unwrap_err();

        assert_eq!(
            err,
            InvalidTransition {
                from: SagaStep::InventoryReserved,
                to: SagaStep::OrderCreated,
            }
        );
        assert_eq!(saga, before);
    }

    #[test]
    fn test_from_parts_round_trip() {
        let mut saga = Saga::start(OrderId::new(), UserId::new());
        saga.set_error_reason("out of stock");

        let rebuilt = Saga::from_parts(SagaParts {
            id: saga.id(),
            current_step: saga.current_step(),
            order_id: saga.order_id(),
            user_id: saga.user_id(),
            error_reason: saga.error_reason().map(str::to_string),
            version: saga.version(),
            created_at: saga.created_at(),
            updated_at: saga.updated_at(),
        });

        assert_eq!(rebuilt, saga);
    }

    #[test]
    fn test_serializes_step_as_stored_name() {
        let saga = Saga::start(OrderId::new(), UserId::new());
        let json = serde_json::to_value(&saga).unwrap();
        assert_eq!(json["current_step"], "ORDER_CREATED");
        assert_eq!(json["order_id"], saga.order_id().to_string());
    }
}
