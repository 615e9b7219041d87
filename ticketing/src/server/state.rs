//! Application state for the purchase API.

use crate::saga::PurchaseSaga;
use axum::extract::FromRef;
use seatguard_runtime::MetricsRecorder;
use std::sync::Arc;

/// State shared across HTTP handlers. Cloned per request.
#[derive(Clone)]
pub struct AppState {
    /// Purchase saga handling `POST /api/v1/tickets`
    pub saga: Arc<PurchaseSaga>,

    /// Prometheus recorder rendered on `GET /metrics`
    pub metrics: Arc<MetricsRecorder>,
}

impl AppState {
    /// Create application state.
    #[must_use]
    pub fn new(saga: Arc<PurchaseSaga>, metrics: Arc<MetricsRecorder>) -> Self {
        Self { saga, metrics }
    }
}

impl FromRef<AppState> for Arc<MetricsRecorder> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.metrics.clone()
    }
}
