//! Ticket purchase endpoint.

use super::error::ApiError;
use crate::server::AppState;
use axum::{
    Json,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header},
};
use seatguard_core::types::{PurchaseRequest, TicketResponse};

/// Buy a seat.
///
/// `POST /api/v1/tickets`
///
/// ```bash
/// curl -X POST http://localhost:8080/api/v1/tickets \
///   -H 'Content-Type: application/json' \
///   -d '{"venueId":"Venue1","eventId":"Event1","zoneId":1,"row":"A","column":"1"}'
/// ```
///
/// Returns 201 with a `Location` header and the ticket once its event is
/// published.
///
/// # Errors
///
/// See [`ApiError`] for the status mapping.
pub async fn purchase_ticket(
    State(state): State<AppState>,
    Json(request): Json<PurchaseRequest>,
) -> Result<(StatusCode, HeaderMap, Json<TicketResponse>), ApiError> {
    let ticket = state.saga.purchase_ticket(&request).await?;

    let mut headers = HeaderMap::new();
    if let Ok(location) = HeaderValue::from_str(&format!("/api/v1/tickets/{}", ticket.ticket_id)) {
        headers.insert(header::LOCATION, location);
    }

    Ok((StatusCode::CREATED, headers, Json(TicketResponse::from(&ticket))))
}
