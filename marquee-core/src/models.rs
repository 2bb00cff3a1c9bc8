use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Queue token status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenStatus {
    Waiting,
    Active,
    Expired,
}

impl TokenStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenStatus::Waiting => "WAITING",
            TokenStatus::Active => "ACTIVE",
            TokenStatus::Expired => "EXPIRED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "WAITING" => Some(TokenStatus::Waiting),
            "ACTIVE" => Some(TokenStatus::Active),
            "EXPIRED" => Some(TokenStatus::Expired),
            _ => None,
        }
    }
}

/// Admission token gating access to reservation operations.
/// Unique per (user_id, event_id) while WAITING or ACTIVE.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueToken {
    pub token_id: Uuid,
    pub user_id: String,
    pub event_id: Uuid,
    pub status: TokenStatus,
    pub issued_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

impl QueueToken {
    /// Create a fresh WAITING token
    pub fn new_waiting(
        token_id: Uuid,
        user_id: String,
        event_id: Uuid,
        now: DateTime<Utc>,
        waiting_ttl: Duration,
    ) -> Self {
        Self {
            token_id,
            user_id,
            event_id,
            status: TokenStatus::Waiting,
            issued_at: now,
            activated_at: None,
            expires_at: now + waiting_ttl,
        }
    }

    /// Promote WAITING -> ACTIVE, restarting the expiry clock
    pub fn activate(&mut self, now: DateTime<Utc>, active_ttl: Duration) {
        self.status = TokenStatus::Active;
        self.activated_at = Some(now);
        self.expires_at = now + active_ttl;
    }

    pub fn expire(&mut self) {
        self.status = TokenStatus::Expired;
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == TokenStatus::Expired || self.expires_at <= now
    }

    /// ACTIVE and still inside its TTL window
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.status == TokenStatus::Active && self.expires_at > now
    }
}

/// Seat status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatStatus {
    Available,
    Held,
    Sold,
}

impl SeatStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeatStatus::Available => "AVAILABLE",
            SeatStatus::Held => "HELD",
            SeatStatus::Sold => "SOLD",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "AVAILABLE" => Some(SeatStatus::Available),
            "HELD" => Some(SeatStatus::Held),
            "SOLD" => Some(SeatStatus::Sold),
            _ => None,
        }
    }
}

/// One seat of one event. The status field is the single source of truth
/// for double-booking prevention and is only mutated through the store's
/// compare-and-set operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Seat {
    pub event_id: Uuid,
    pub seat_number: u32,
    pub status: SeatStatus,
    pub reservation_id: Option<Uuid>,
    pub price: i64,
}

/// Reservation status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Holding,
    Confirmed,
    Expired,
    Cancelled,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Holding => "HOLDING",
            ReservationStatus::Confirmed => "CONFIRMED",
            ReservationStatus::Expired => "EXPIRED",
            ReservationStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "HOLDING" => Some(ReservationStatus::Holding),
            "CONFIRMED" => Some(ReservationStatus::Confirmed),
            "EXPIRED" => Some(ReservationStatus::Expired),
            "CANCELLED" => Some(ReservationStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReservationStatus::Holding)
    }

    /// The only legal transitions are HOLDING -> {CONFIRMED, EXPIRED, CANCELLED}
    pub fn can_transition_to(&self, target: ReservationStatus) -> bool {
        matches!(self, ReservationStatus::Holding) && target.is_terminal()
    }
}

/// A time-bounded claim on a seat, created when a hold succeeds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub reservation_id: Uuid,
    pub user_id: String,
    pub event_id: Uuid,
    pub seat_number: u32,
    pub queue_token_id: Uuid,
    pub status: ReservationStatus,
    pub held_at: DateTime<Utc>,
    pub hold_expires_at: DateTime<Utc>,
}

impl Reservation {
    pub fn new_holding(
        reservation_id: Uuid,
        user_id: String,
        event_id: Uuid,
        seat_number: u32,
        queue_token_id: Uuid,
        now: DateTime<Utc>,
        hold_ttl: Duration,
    ) -> Self {
        Self {
            reservation_id,
            user_id,
            event_id,
            seat_number,
            queue_token_id,
            status: ReservationStatus::Holding,
            held_at: now,
            hold_expires_at: now + hold_ttl,
        }
    }

    pub fn hold_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.hold_expires_at <= now
    }

    /// Still HOLDING and inside the hold window, so payment may confirm it
    pub fn can_be_confirmed(&self, user_id: &str, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Holding
            && self.user_id == user_id
            && !self.hold_lapsed(now)
    }
}

/// User balance in currency minor units. The version field increments on
/// every successful mutation and backs the optimistic write check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Balance {
    pub user_id: String,
    pub amount: i64,
    pub version: u64,
}

impl Balance {
    pub fn zero(user_id: String) -> Self {
        Self {
            user_id,
            amount: 0,
            version: 0,
        }
    }
}

/// Proof of a completed settlement. Written in the same atomic unit as the
/// debit, so a duplicate settle returns the original receipt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    pub receipt_id: Uuid,
    pub reservation_id: Uuid,
    pub user_id: String,
    pub amount: i64,
    pub balance_after: i64,
    pub settled_at: DateTime<Utc>,
}

/// Event metadata seeded once at creation; seats hang off it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_id: Uuid,
    pub name: String,
    pub seat_count: u32,
    pub price: i64,
    pub created_at: DateTime<Utc>,
}
