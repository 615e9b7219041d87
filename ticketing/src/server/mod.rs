//! HTTP server wiring.
//!
//! - [`state`]: shared handler state
//! - [`health`]: liveness and Prometheus scrape endpoints
//! - [`routes`]: the purchase router and the consumer's ops router

pub mod health;
pub mod routes;
pub mod state;

pub use health::{health_check, metrics_handler};
pub use routes::{build_router, ops_router};
pub use state::AppState;
