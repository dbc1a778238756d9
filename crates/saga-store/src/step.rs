//! Saga step state machine.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The step a saga has reached.
///
/// Step transitions:
/// ```text
/// OrderCreated ──► InventoryReserved ──► PaymentProcessing ──► Completed
///      │                  │                     │
///      └──────────────────┴─────────┬───────────┘
///                                   ▼
///                     Compensating ──► Compensated
/// ```
///
/// Any non-terminal step may also jump straight to `Compensated` when a
/// compensation trigger arrives before the failure reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaStep {
    /// The saga exists and inventory has been asked to reserve items.
    #[default]
    OrderCreated,

    /// Inventory reserved every item.
    InventoryReserved,

    /// Payment has been requested.
    PaymentProcessing,

    /// Every step succeeded (terminal).
    Completed,

    /// A step failed and the order is being cancelled.
    Compensating,

    /// Compensation finished (terminal).
    Compensated,
}

impl SagaStep {
    pub const ALL: [SagaStep; 6] = [
        SagaStep::OrderCreated,
        SagaStep::InventoryReserved,
        SagaStep::PaymentProcessing,
        SagaStep::Completed,
        SagaStep::Compensating,
        SagaStep::Compensated,
    ];

    /// Returns true if this is a terminal step.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaStep::Completed | SagaStep::Compensated)
    }

    /// Returns true if the saga is on the compensation branch.
    pub fn is_compensating(&self) -> bool {
        matches!(self, SagaStep::Compensating | SagaStep::Compensated)
    }

    /// Returns true if the saga may move from this step to `next`.
    ///
    /// Staying on the same step is not a transition.
    pub fn can_transition_to(&self, next: SagaStep) -> bool {
        use SagaStep::*;

        match (self, next) {
            (OrderCreated, InventoryReserved) => true,
            (InventoryReserved, PaymentProcessing) => true,
            (PaymentProcessing, Completed) => true,
            (OrderCreated | InventoryReserved | PaymentProcessing, Compensating | Compensated) => {
                true
            }
            (Compensating, Compensated) => true,
            _ => false,
        }
    }

    /// Returns the step name as stored and serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStep::OrderCreated => "ORDER_CREATED",
            SagaStep::InventoryReserved => "INVENTORY_RESERVED",
            SagaStep::PaymentProcessing => "PAYMENT_PROCESSING",
            SagaStep::Completed => "COMPLETED",
            SagaStep::Compensating => "COMPENSATING",
            SagaStep::Compensated => "COMPENSATED",
        }
    }
}

impl std::fmt::Display for SagaStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A step name that is not one of [`SagaStep::ALL`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown saga step: {0}")]
pub struct UnknownStep(pub String);

impl FromStr for SagaStep {
    type Err = UnknownStep;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SagaStep::ALL
            .into_iter()
            .find(|step| step.as_str() == s)
            .ok_or_else(|| UnknownStep(s.to_string()))
    }
}

/// A move the step graph does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Invalid saga transition from {from} to {to}")]
pub struct InvalidTransition {
    pub from: SagaStep,
    pub to: SagaStep,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_step_is_order_created() {
        assert_eq!(SagaStep::default(), SagaStep::OrderCreated);
    }

    #[test]
    fn test_forward_path() {
        assert!(SagaStep::OrderCreated.can_transition_to(SagaStep::InventoryReserved));
        assert!(SagaStep::InventoryReserved.can_transition_to(SagaStep::PaymentProcessing));
        assert!(SagaStep::PaymentProcessing.can_transition_to(SagaStep::Completed));

        assert!(!SagaStep::OrderCreated.can_transition_to(SagaStep::PaymentProcessing));
        assert!(!SagaStep::InventoryReserved.can_transition_to(SagaStep::OrderCreated));
        assert!(!SagaStep::OrderCreated.can_transition_to(SagaStep::OrderCreated));
    }

    #[test]
    fn test_compensation_branch() {
        for step in [
            SagaStep::OrderCreated,
            SagaStep::InventoryReserved,
            SagaStep::PaymentProcessing,
        ] {
            assert!(step.can_transition_to(SagaStep::Compensating));
            assert!(step.can_transition_to(SagaStep::Compensated));
        }
        assert!(SagaStep::Compensating.can_transition_to(SagaStep::Compensated));
        assert!(!SagaStep::Compensating.can_transition_to(SagaStep::InventoryReserved));
    }

    #[test]
    fn test_terminal_steps_go_nowhere() {
        for terminal in [SagaStep::Completed, SagaStep::Compensated] {
            assert!(terminal.is_terminal());
            for next in SagaStep::ALL {
                assert!(!terminal.can_transition_to(next));
            }
        }
        assert!(!SagaStep::Compensating.is_terminal());
    }

    #[test]
    fn test_parse_and_display() {
        for step in SagaStep::ALL {
            assert_eq!(step.to_string().parse::<SagaStep>().unwrap(), step);
        }
        assert_eq!(
            "Running".parse::<SagaStep>(),
            Err(UnknownStep("Running".to_string()))
        );
    }

    #[test]
    fn test_serialization() {
        let json = serde_json::to_string(&SagaStep::InventoryReserved).unwrap();
        assert_eq!(json, "\"INVENTORY_RESERVED\"");
        let step: SagaStep = serde_json::from_str("\"COMPENSATED\"").unwrap();
        assert_eq!(step, SagaStep::Compensated);
    }
}
