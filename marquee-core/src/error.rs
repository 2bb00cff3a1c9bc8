use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("Admission required: present an ACTIVE queue token")]
    AdmissionRequired,

    #[error("Queue token not found: {0}")]
    TokenNotFound(Uuid),

    #[error("Queue token expired: {0}")]
    TokenExpired(Uuid),

    #[error("Seat {seat_number} not found for event {event_id}")]
    SeatNotFound { event_id: Uuid, seat_number: u32 },

    #[error("Seat {seat_number} for event {event_id} is not available")]
    SeatUnavailable { event_id: Uuid, seat_number: u32 },

    #[error("Reservation not found: {0}")]
    ReservationNotFound(Uuid),

    #[error("Reservation {0} is not holding a seat")]
    ReservationNotHolding(Uuid),

    #[error("Invalid reservation state transition from {from} to {to}")]
    InvalidReservationState { from: String, to: String },

    #[error("Insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance { available: i64, requested: i64 },

    #[error("Invalid amount: {0}")]
    InvalidAmount(i64),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
}

impl BookingError {
    /// Only transient store failures are eligible for automatic retry.
    /// Business outcomes are surfaced to the caller as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BookingError::StoreUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_store_failures_are_retryable() {
        assert!(BookingError::StoreUnavailable("timeout".to_string()).is_retryable());
        assert!(!BookingError::AdmissionRequired.is_retryable());
        assert!(!BookingError::SeatUnavailable {
            event_id: Uuid::nil(),
            seat_number: 1
        }
        .is_retryable());
        assert!(!BookingError::InsufficientBalance {
            available: 100,
            requested: 200
        }
        .is_retryable());
    }
}
