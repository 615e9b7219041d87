//! HTTP surface of the purchase service, driven through `tower::ServiceExt`.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use seatguard_core::capacity::{CapacityStore, VenueZoneConfig};
use seatguard_core::types::{TicketResponse, VenueId, ZoneId};
use seatguard_runtime::MetricsRecorder;
use seatguard_testing::helpers::{event, open_zone};
use seatguard_testing::{InMemoryCapacityStore, InMemoryMessageBus, InMemorySeatStore, test_clock};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use ticketing::admission::AdmissionEngine;
use ticketing::api::ErrorBody;
use ticketing::saga::PurchaseSaga;
use ticketing::server::{AppState, build_router};
use tower::ServiceExt;

struct App {
    router: Router,
    bus: Arc<InMemoryMessageBus>,
    seats: Arc<InMemorySeatStore>,
}

async fn app() -> App {
    let capacity = Arc::new(InMemoryCapacityStore::new());
    capacity
        .put_zone(&VenueZoneConfig::new(VenueId::new("Venue1"), ZoneId::new(1), 26, 30).unwrap())
        .await
        .unwrap();
    let seats = Arc::new(InMemorySeatStore::new());
    open_zone(seats.as_ref(), &event("Event1"), 1, 26, 30).await;
    let bus = Arc::new(InMemoryMessageBus::new());

    let engine = AdmissionEngine::new(capacity, seats.clone(), Duration::from_secs(1));
    let saga = PurchaseSaga::new(engine, bus.clone(), Arc::new(test_clock()));
    let state = AppState::new(Arc::new(saga), Arc::new(MetricsRecorder::new()));
    App { router: build_router(state), bus, seats }
}

fn purchase_request(body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/v1/tickets")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn seat(zone: u32, row: &str, column: &str) -> Value {
    json!({
        "venueId": "Venue1",
        "eventId": "Event1",
        "zoneId": zone,
        "row": row,
        "column": column,
    })
}

async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn purchase_returns_created_with_location() {
    let app = app().await;

    let response = app
        .router
        .clone()
        .oneshot(purchase_request(&seat(1, "Z", "7")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let location = response.headers()[header::LOCATION].to_str().unwrap().to_string();
    let ticket: TicketResponse = body_json(response).await;
    assert_eq!(location, format!("/api/v1/tickets/{}", ticket.ticket_id));
    assert_eq!(ticket.zone_id, ZoneId::new(1));
    assert_eq!(ticket.row, "Z");
    assert_eq!(ticket.column, "7");
    assert_eq!(app.bus.published().len(), 1);
}

#[tokio::test]
async fn response_body_uses_camel_case_fields() {
    let app = app().await;
    let response = app.router.oneshot(purchase_request(&seat(1, "A", "1"))).await.unwrap();

    let body: Value = body_json(response).await;
    for field in ["ticketId", "zoneId", "row", "column", "createdOn"] {
        assert!(body.get(field).is_some(), "missing {field} in {body}");
    }
    assert_eq!(body["createdOn"], "2025-01-01T00:00:00Z");
}

#[tokio::test]
async fn second_buyer_of_a_seat_gets_conflict() {
    let app = app().await;
    let first = app.router.clone().oneshot(purchase_request(&seat(1, "C", "3"))).await.unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);

    let second = app.router.clone().oneshot(purchase_request(&seat(1, "C", "3"))).await.unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
    let body: ErrorBody = body_json(second).await;
    assert_eq!(body.code, "SEAT_OCCUPIED");
}

#[tokio::test]
async fn invalid_seat_is_bad_request() {
    let app = app().await;
    let response = app.router.oneshot(purchase_request(&seat(1, "A", "31"))).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: ErrorBody = body_json(response).await;
    assert_eq!(body.code, "INVALID_SEAT");
}

#[tokio::test]
async fn unconfigured_zone_is_not_found() {
    let app = app().await;
    let response = app.router.oneshot(purchase_request(&seat(5, "A", "1"))).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: ErrorBody = body_json(response).await;
    assert_eq!(body.code, "ZONE_NOT_CONFIGURED");
}

#[tokio::test]
async fn publish_failure_is_internal_error_and_frees_the_seat() {
    let app = app().await;
    app.bus.set_publish_failing(true);

    let response = app.router.clone().oneshot(purchase_request(&seat(1, "B", "2"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: ErrorBody = body_json(response).await;
    assert_eq!(body.code, "TICKET_CREATION_FAILED");
    assert_eq!(app.seats.release_calls(), 1);

    app.bus.set_publish_failing(false);
    let retry = app.router.oneshot(purchase_request(&seat(1, "B", "2"))).await.unwrap();
    assert_eq!(retry.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn health_is_ok_and_metrics_need_an_installed_recorder() {
    let app = app().await;

    let health = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(health.status(), StatusCode::OK);
    let body: Value = body_json(health).await;
    assert_eq!(body["status"], "ok");

    let metrics = app
        .router
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(metrics.status(), StatusCode::SERVICE_UNAVAILABLE);
}
