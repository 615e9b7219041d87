//! Seat admission, purchase saga and ticket persistence.
//!
//! The purchase service sells individual seats under heavy concurrent demand
//! without ever selling one twice. The persistence consumer writes every sold
//! ticket to `PostgreSQL` at least once.
//!
//! # Architecture
//!
//! ```text
//! POST /api/v1/tickets
//!        │
//!        ▼
//! ┌──────────────┐  occupy / release  ┌────────────────────┐
//! │ PurchaseSaga │───────────────────▶│  AdmissionEngine   │──▶ Redis (Lua)
//! └──────┬───────┘                    └────────────────────┘
//!        │ TicketCreated.v1 (ticket.created)
//!        ▼
//!   Redpanda | NATS ──▶ DeliveryConsumer ──▶ TicketPersistenceHandler ──▶ ticket
//!                              │
//!                              └── dropped ──▶ dropped_ticket_messages
//! ```
//!
//! # Modules
//!
//! - [`admission`]: atomic seat occupy/release and capacity reads
//! - [`capacity`]: venue table bootstrap and event opening
//! - [`saga`]: reserve, publish, compensate
//! - [`persistence`]: idempotent ticket upsert handler
//! - [`api`], [`server`]: the axum surface
//! - [`bootstrap`], [`runtime`]: connections and process lifecycle
//! - [`config`], [`metrics`]: environment configuration and business metrics

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod admission;
pub mod api;
pub mod bootstrap;
pub mod capacity;
pub mod config;
pub mod metrics;
pub mod persistence;
pub mod runtime;
pub mod saga;
pub mod server;

pub use admission::{AdmissionEngine, AdmissionError};
pub use capacity::{BootstrapError, CapacityBootstrap};
pub use config::Config;
pub use persistence::TicketPersistenceHandler;
pub use saga::{PurchaseError, PurchaseSaga, SagaStage};
