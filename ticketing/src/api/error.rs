//! HTTP error responses for the purchase API.
//!
//! Every failure leaves as a JSON body `{"code": ..., "message": ...}`:
//!
//! | error | status | code |
//! |---|---|---|
//! | seat, row or zone taken | 409 | `SEAT_OCCUPIED`, `ROW_FULL`, `ZONE_FULL` |
//! | malformed seat | 400 | `INVALID_SEAT` |
//! | zone has no configuration | 404 | `ZONE_NOT_CONFIGURED` |
//! | ticket creation failed | 500 | `TICKET_CREATION_FAILED` |
//! | anything else | 500 | `INTERNAL_SERVER_ERROR` |

use crate::admission::AdmissionError;
use crate::saga::PurchaseError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error returned by API handlers.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    /// Create an error.
    #[must_use]
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    /// 400 Bad Request.
    #[must_use]
    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    /// 404 Not Found.
    #[must_use]
    pub fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, code, message)
    }

    /// 409 Conflict.
    #[must_use]
    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, code, message)
    }

    /// 500 Internal Server Error.
    #[must_use]
    pub fn internal(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, code, message)
    }

    /// HTTP status.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

/// JSON error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable code
    pub code: String,
    /// Human-readable message
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(
                status = %self.status,
                code = self.code,
                message = %self.message,
                "Purchase request failed"
            );
        }

        let body = ErrorBody {
            code: self.code.to_string(),
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<AdmissionError> for ApiError {
    fn from(err: AdmissionError) -> Self {
        let message = err.to_string();
        match &err {
            e if e.is_conflict() => Self::conflict(e.code(), message),
            AdmissionError::InvalidSeat { .. } => Self::bad_request(err.code(), message),
            AdmissionError::ZoneNotConfigured { .. } => Self::not_found(err.code(), message),
            _ => Self::internal("INTERNAL_SERVER_ERROR", "Seat reservation failed"),
        }
    }
}

impl From<PurchaseError> for ApiError {
    fn from(err: PurchaseError) -> Self {
        match err {
            PurchaseError::Admission(e) => e.into(),
            PurchaseError::TicketCreation { .. } | PurchaseError::TicketCreationFailed => {
                Self::internal("TICKET_CREATION_FAILED", "Ticket creation failed")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seatguard_core::capacity::StoreError;
    use seatguard_core::message_bus::BusError;
    use seatguard_core::types::{TicketId, VenueId, ZoneId};

    #[test]
    fn capacity_conflicts_are_409_with_their_code() {
        let err = ApiError::from(PurchaseError::from(AdmissionError::RowFull {
            zone: ZoneId::new(1),
            row: "C".into(),
        }));
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.code(), "ROW_FULL");
    }

    #[test]
    fn bad_input_maps_to_client_errors() {
        let invalid = ApiError::from(AdmissionError::InvalidSeat {
            row: "a1".into(),
            column: "x".into(),
            reason: "bad".into(),
        });
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);

        let missing = ApiError::from(AdmissionError::ZoneNotConfigured {
            venue: VenueId::new("Venue9"),
            zone: ZoneId::new(4),
        });
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        assert_eq!(missing.code(), "ZONE_NOT_CONFIGURED");
    }

    #[test]
    fn infrastructure_failures_hide_details() {
        let store = ApiError::from(AdmissionError::Store(StoreError::Connection("refused".into())));
        assert_eq!(store.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!store.to_string().contains("refused"));

        let publish = ApiError::from(PurchaseError::TicketCreation {
            ticket_id: TicketId::generate(),
            source: BusError::TransportError("down".into()),
        });
        assert_eq!(publish.code(), "TICKET_CREATION_FAILED");
        assert_eq!(
            ApiError::from(PurchaseError::TicketCreationFailed).code(),
            "TICKET_CREATION_FAILED"
        );
    }
}
