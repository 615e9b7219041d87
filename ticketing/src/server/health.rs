//! Health and metrics endpoints.

use axum::{Json, extract::State, http::StatusCode};
use seatguard_runtime::MetricsRecorder;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,
    /// Service version
    pub version: String,
}

/// Liveness check. Does not probe Redis, the bus or `PostgreSQL`.
///
/// ```bash
/// curl http://localhost:8080/health
/// # {"status":"ok","version":"0.1.0"}
/// ```
pub async fn health_check() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

/// Prometheus scrape endpoint.
///
/// Returns 503 when this process did not install the recorder.
pub async fn metrics_handler(State(metrics): State<Arc<MetricsRecorder>>) -> (StatusCode, String) {
    match metrics.render() {
        Some(body) => (StatusCode::OK, body),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics recorder not installed".to_string(),
        ),
    }
}
