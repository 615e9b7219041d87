//! Business metrics for the ticketing services.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `seatguard_reservations_total{outcome}` - occupy attempts by outcome
//!   (`ok`, `SEAT_OCCUPIED`, `ROW_FULL`, `ZONE_FULL`, ...)
//! - `seatguard_tickets_published_total` - ticket events published
//! - `seatguard_compensations_total{outcome}` - seat releases after a failed
//!   publish (`released`, `already_free`, `failed`)
//! - `seatguard_tickets_persisted_total{outcome}` - consumer upserts
//!   (`inserted`, `duplicate`)
//!
//! ## Histograms
//! - `seatguard_reservation_duration_seconds` - occupy latency
//! - `seatguard_purchase_duration_seconds{outcome}` - end-to-end purchase time

use metrics::{describe_counter, describe_histogram};
use std::time::Duration;

/// Register all business metric descriptions.
///
/// Call once at startup, after the recorder is installed.
pub fn register_business_metrics() {
    describe_counter!(
        "seatguard_reservations_total",
        "Seat occupy attempts by outcome"
    );
    describe_histogram!(
        "seatguard_reservation_duration_seconds",
        "Time taken by one atomic occupy"
    );
    describe_counter!(
        "seatguard_tickets_published_total",
        "Ticket created events published"
    );
    describe_counter!(
        "seatguard_compensations_total",
        "Seat releases after a failed publish, by outcome"
    );
    describe_histogram!(
        "seatguard_purchase_duration_seconds",
        "Time from purchase request to response, by outcome"
    );
    describe_counter!(
        "seatguard_tickets_persisted_total",
        "Ticket upserts by the persistence consumer, by outcome"
    );
}

/// Record one occupy attempt.
pub fn record_reservation(outcome: &'static str, duration: Duration) {
    metrics::counter!("seatguard_reservations_total", "outcome" => outcome).increment(1);
    metrics::histogram!("seatguard_reservation_duration_seconds").record(duration.as_secs_f64());
}

/// Record a published ticket event.
pub fn record_ticket_published() {
    metrics::counter!("seatguard_tickets_published_total").increment(1);
}

/// Record a compensating release.
pub fn record_compensation(outcome: &'static str) {
    metrics::counter!("seatguard_compensations_total", "outcome" => outcome).increment(1);
}

/// Record a finished purchase.
pub fn record_purchase(outcome: &'static str, duration: Duration) {
    metrics::histogram!("seatguard_purchase_duration_seconds", "outcome" => outcome)
        .record(duration.as_secs_f64());
}

/// Record a consumer upsert.
pub fn record_ticket_persisted(outcome: &'static str) {
    metrics::counter!("seatguard_tickets_persisted_total", "outcome" => outcome).increment(1);
}
