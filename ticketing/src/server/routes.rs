//! Router configuration.

use super::health::{health_check, metrics_handler};
use super::state::AppState;
use crate::api::purchase_ticket;
use axum::{
    Router,
    routing::{get, post},
};
use seatguard_runtime::MetricsRecorder;
use std::sync::Arc;

/// Build the purchase service router.
///
/// - `GET /health`
/// - `GET /metrics`
/// - `POST /api/v1/tickets`
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new().route("/tickets", post(purchase_ticket));

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .nest("/api/v1", api_routes)
        .with_state(state)
}

/// Build the ops router served by the consumer process: `/health` and
/// `/metrics` only.
pub fn ops_router(metrics: Arc<MetricsRecorder>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .with_state(metrics)
}
