use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatEventKind {
    Held,
    Sold,
    Released,
}

/// Seat transition notification fanned out to stream subscribers.
/// Best-effort only; the seat listing read path is the source of truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeatEvent {
    pub event_id: Uuid,
    pub seat_number: u32,
    pub kind: SeatEventKind,
    pub reservation_id: Uuid,
    pub at: DateTime<Utc>,
}

impl SeatEvent {
    pub fn new(event_id: Uuid, seat_number: u32, kind: SeatEventKind, reservation_id: Uuid) -> Self {
        Self {
            event_id,
            seat_number,
            kind,
            reservation_id,
            at: Utc::now(),
        }
    }
}
