use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use marquee_core::BookingError;
use serde_json::json;

/// API-level error wrapper. Booking errors map onto HTTP statuses here so
/// handlers can bubble them up with `?`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Booking(#[from] BookingError),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Booking(e) => match e {
                BookingError::AdmissionRequired => (StatusCode::BAD_REQUEST, "ADMISSION_REQUIRED"),
                BookingError::TokenNotFound(_) => (StatusCode::BAD_REQUEST, "TOKEN_NOT_FOUND"),
                BookingError::TokenExpired(_) => (StatusCode::BAD_REQUEST, "TOKEN_EXPIRED"),
                BookingError::InsufficientBalance { .. } => {
                    (StatusCode::BAD_REQUEST, "INSUFFICIENT_BALANCE")
                }
                BookingError::InvalidAmount(_) => (StatusCode::BAD_REQUEST, "INVALID_AMOUNT"),
                BookingError::SeatNotFound { .. } => (StatusCode::NOT_FOUND, "SEAT_NOT_FOUND"),
                BookingError::ReservationNotFound(_) => {
                    (StatusCode::NOT_FOUND, "RESERVATION_NOT_FOUND")
                }
                BookingError::SeatUnavailable { .. } => (StatusCode::CONFLICT, "SEAT_UNAVAILABLE"),
                BookingError::ReservationNotHolding(_) => {
                    (StatusCode::CONFLICT, "RESERVATION_NOT_HOLDING")
                }
                BookingError::InvalidReservationState { .. } => {
                    (StatusCode::CONFLICT, "INVALID_RESERVATION_STATE")
                }
                BookingError::StoreUnavailable(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "STORE_UNAVAILABLE")
                }
            },
            ApiError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        // Transient store failures carry connection detail that clients
        // should not see; log it and return a generic message.
        let message = match &self {
            ApiError::Booking(BookingError::StoreUnavailable(detail)) => {
                tracing::error!(%detail, "store unavailable");
                "store unavailable, try again".to_string()
            }
            ApiError::Internal(e) => {
                tracing::error!(error = %e, "internal error");
                "internal error".to_string()
            }
            other => other.to_string(),
        };

        (status, Json(json!({ "error": message, "code": code }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_booking_errors_map_to_expected_statuses() {
        let cases = [
            (BookingError::AdmissionRequired, StatusCode::BAD_REQUEST),
            (
                BookingError::TokenExpired(uuid::Uuid::nil()),
                StatusCode::BAD_REQUEST,
            ),
            (
                BookingError::SeatNotFound {
                    event_id: uuid::Uuid::nil(),
                    seat_number: 7,
                },
                StatusCode::NOT_FOUND,
            ),
            (
                BookingError::SeatUnavailable {
                    event_id: uuid::Uuid::nil(),
                    seat_number: 7,
                },
                StatusCode::CONFLICT,
            ),
            (
                BookingError::StoreUnavailable("redis gone".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            let (status, _) = ApiError::Booking(err).status_and_code();
            assert_eq!(status, expected);
        }
    }

    #[test]
    fn test_store_detail_is_not_leaked() {
        let err = ApiError::Booking(BookingError::StoreUnavailable(
            "redis://10.0.0.5:6379 refused".into(),
        ));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
