//! Prometheus recorder shared by every seatguard binary.
//!
//! [`MetricsRecorder::install`] registers the global `metrics` recorder and
//! the descriptions of the metrics this crate and the stores emit. Services
//! expose [`MetricsRecorder::render`] on `GET /metrics`.
//!
//! # Exported Metrics
//!
//! - `seatguard_consumer_messages_total{consumer,outcome}` - deliveries by
//!   settlement (`ack`, `requeued`, `rejected`, `dropped`)
//! - `seatguard_consumer_handle_duration_seconds{consumer}` - handler latency
//! - `seatguard_dropped_messages_total` - entries written to the dropped ledger
//! - `seatguard_dropped_messages_resolved_total` - ledger entries resolved
//!
//! # Example
//!
//! ```rust,no_run
//! use seatguard_runtime::metrics::MetricsRecorder;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut recorder = MetricsRecorder::new();
//! recorder.install()?;
//! let body = recorder.render().unwrap_or_default();
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use thiserror::Error;

/// Latency buckets for every `*_duration_seconds` histogram.
const DURATION_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Handle to the installed Prometheus recorder.
#[derive(Default)]
pub struct MetricsRecorder {
    handle: Option<PrometheusHandle>,
}

impl MetricsRecorder {
    /// Create an uninstalled recorder.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Install the global recorder and register metric descriptions.
    ///
    /// Installing twice in one process (tests) is tolerated: the second call
    /// logs a warning and [`render`](Self::render) returns `None`.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] if the exporter cannot be built or installed.
    pub fn install(&mut self) -> Result<(), MetricsError> {
        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(Matcher::Suffix("duration_seconds".to_string()), DURATION_BUCKETS)
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                register_metrics();
                tracing::info!("Prometheus metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus text format.
    ///
    /// Returns `None` if this instance did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    describe_counter!(
        "seatguard_consumer_messages_total",
        "Deliveries settled by consumers, by outcome (ack, requeued, rejected, dropped)"
    );
    describe_histogram!(
        "seatguard_consumer_handle_duration_seconds",
        "Time spent in a delivery handler"
    );
    describe_counter!(
        "seatguard_dropped_messages_total",
        "Messages written to the dropped message ledger"
    );
    describe_counter!(
        "seatguard_dropped_messages_resolved_total",
        "Dropped message ledger entries marked resolved"
    );
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn new_recorder_renders_nothing() {
        let recorder = MetricsRecorder::new();
        assert!(recorder.handle().is_none());
        assert!(recorder.render().is_none());
    }

    #[test]
    fn installed_recorder_renders_consumer_metrics() {
        let mut recorder = MetricsRecorder::new();
        recorder.install().unwrap();

        metrics::counter!(
            "seatguard_consumer_messages_total",
            "consumer" => "test",
            "outcome" => "ack"
        )
        .increment(1);

        // Another test in this binary may have installed the recorder first.
        if let Some(rendered) = recorder.render() {
            assert!(rendered.contains("seatguard_consumer_messages_total"));
        }

        let mut second = MetricsRecorder::new();
        assert!(second.install().is_ok());
    }
}
