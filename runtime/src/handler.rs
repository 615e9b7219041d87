//! Delivery handlers and the redelivery policy that settles their results.
//!
//! A [`DeliveryHandler`] turns one delivery into a side effect (a database
//! upsert, a projection update) and classifies its failure. It never touches
//! the acknowledgement handle: the [`DeliveryConsumer`](crate::DeliveryConsumer)
//! asks the [`RedeliveryPolicy`] how to settle and does it.
//!
//! | handler result | attempt | settlement |
//! |---|---|---|
//! | `Ok` | any | [`Settlement::Ack`] |
//! | `Transient` | `<= max_requeues` | [`Settlement::Requeue`] |
//! | `Transient` | `> max_requeues` | [`Settlement::Reject`] |
//! | `Permanent` | any | [`Settlement::Drop`] |
//!
//! # Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use seatguard_core::message_bus::Delivery;
//! use seatguard_runtime::{DeliveryHandler, HandlerError};
//!
//! struct RejectEmpty;
//!
//! #[async_trait]
//! impl DeliveryHandler for RejectEmpty {
//!     async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError> {
//!         if delivery.message().payload.is_empty() {
//!             return Err(HandlerError::Permanent("empty payload".into()));
//!         }
//!         Ok(())
//!     }
//! }
//! ```

use async_trait::async_trait;
use seatguard_core::message_bus::{AckDecision, Delivery};
use thiserror::Error;

/// Why a handler could not process a delivery.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// Retrying later may succeed (database unreachable, deadlock, timeout).
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Retrying can never succeed (malformed payload, constraint violation).
    #[error("Permanent failure: {0}")]
    Permanent(String),
}

impl HandlerError {
    /// Whether the transport should redeliver.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Processes deliveries for a [`DeliveryConsumer`](crate::DeliveryConsumer).
///
/// Called concurrently from the consumer's worker pool, so implementations
/// must be `Send + Sync` and must tolerate the same message arriving twice.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    /// Process one delivery.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError`] classified by whether redelivery can help.
    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError>;
}

/// How a delivery gets settled after its handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Processed; acknowledge.
    Ack,
    /// Transient failure within the limit; nack with requeue.
    Requeue,
    /// Transient failure past the limit; nack without requeue.
    Reject,
    /// Permanent failure; acknowledge so it never comes back.
    Drop,
}

impl Settlement {
    /// The transport decision this settlement maps to.
    #[must_use]
    pub const fn decision(self) -> AckDecision {
        match self {
            Self::Ack | Self::Drop => AckDecision::Ack,
            Self::Requeue => AckDecision::Nack { requeue: true },
            Self::Reject => AckDecision::Nack { requeue: false },
        }
    }

    /// The message leaves the transport without being processed.
    #[must_use]
    pub const fn is_dropped(self) -> bool {
        matches!(self, Self::Reject | Self::Drop)
    }

    /// Metric label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ack => "ack",
            Self::Requeue => "requeued",
            Self::Reject => "rejected",
            Self::Drop => "dropped",
        }
    }
}

/// Redelivery limit for transient failures.
///
/// `max_requeues` counts how many times a delivery may be put back. The
/// default of 1 requeues a first delivery and rejects any redelivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedeliveryPolicy {
    max_requeues: u32,
}

impl Default for RedeliveryPolicy {
    fn default() -> Self {
        Self { max_requeues: 1 }
    }
}

impl RedeliveryPolicy {
    /// Allow `max_requeues` requeues per message. Zero never requeues.
    #[must_use]
    pub const fn new(max_requeues: u32) -> Self {
        Self { max_requeues }
    }

    /// Requeues allowed per message.
    #[must_use]
    pub const fn max_requeues(&self) -> u32 {
        self.max_requeues
    }

    /// Settle a handler result for the delivery's `attempt` (1 = first).
    #[must_use]
    pub fn decide(&self, result: &Result<(), HandlerError>, attempt: u32) -> Settlement {
        match result {
            Ok(()) => Settlement::Ack,
            Err(HandlerError::Permanent(_)) => Settlement::Drop,
            Err(HandlerError::Transient(_)) if attempt <= self.max_requeues => Settlement::Requeue,
            Err(HandlerError::Transient(_)) => Settlement::Reject,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn transient() -> Result<(), HandlerError> {
        Err(HandlerError::Transient("connection reset".into()))
    }

    #[test]
    fn default_policy_requeues_only_the_first_delivery() {
        let policy = RedeliveryPolicy::default();
        assert_eq!(policy.decide(&transient(), 1), Settlement::Requeue);
        assert_eq!(policy.decide(&transient(), 2), Settlement::Reject);
        assert_eq!(policy.decide(&transient(), 7), Settlement::Reject);
    }

    #[test]
    fn permanent_failures_are_dropped_and_acknowledged() {
        let policy = RedeliveryPolicy::default();
        let settlement = policy.decide(&Err(HandlerError::Permanent("bad json".into())), 1);
        assert_eq!(settlement, Settlement::Drop);
        assert_eq!(settlement.decision(), AckDecision::Ack);
        assert!(settlement.is_dropped());
    }

    #[test]
    fn zero_requeues_rejects_immediately() {
        let policy = RedeliveryPolicy::new(0);
        assert_eq!(policy.decide(&transient(), 1), Settlement::Reject);
        assert_eq!(Settlement::Reject.decision(), AckDecision::Nack { requeue: false });
    }

    proptest! {
        #[test]
        fn success_is_always_acknowledged(max in 0u32..10, attempt in 1u32..100) {
            let settlement = RedeliveryPolicy::new(max).decide(&Ok(()), attempt);
            prop_assert_eq!(settlement, Settlement::Ack);
            prop_assert!(!settlement.is_dropped());
        }

        #[test]
        fn transient_failures_requeue_exactly_max_times(max in 0u32..10) {
            let policy = RedeliveryPolicy::new(max);
            let requeues = (1..=max + 5)
                .filter(|attempt| policy.decide(&transient(), *attempt) == Settlement::Requeue)
                .count();
            prop_assert_eq!(requeues, max as usize);
        }
    }
}
