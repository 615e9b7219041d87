//! # Seatguard Runtime
//!
//! The long-running machinery shared by seatguard services:
//!
//! - [`consumer`]: the at-least-once [`DeliveryConsumer`] loop with a bounded
//!   worker pool, reconnect backoff and graceful shutdown
//! - [`handler`]: the [`DeliveryHandler`] seam and the [`RedeliveryPolicy`]
//!   that turns handler results into ack/nack decisions
//! - [`retry`]: exponential backoff for startup connections
//! - [`metrics`]: the Prometheus recorder behind `GET /metrics`

pub mod consumer;
pub mod handler;
pub mod metrics;
pub mod retry;

pub use consumer::{ConsumerError, DEFAULT_CONCURRENCY, DeliveryConsumer, DeliveryConsumerBuilder};
pub use handler::{DeliveryHandler, HandlerError, RedeliveryPolicy, Settlement};
pub use metrics::{MetricsError, MetricsRecorder};
pub use retry::{RetryPolicy, retry_with_predicate};
