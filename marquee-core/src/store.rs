use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::error::BookingError;
use crate::models::{
    Balance, EventRecord, QueueToken, Receipt, Reservation, ReservationStatus, Seat,
};

/// Arguments for the atomic enqueue-or-return-existing operation
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub token_id: Uuid,
    pub user_id: String,
    pub event_id: Uuid,
    pub now: DateTime<Utc>,
    pub capacity: u32,
    pub active_ttl: Duration,
    pub waiting_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct EnqueueOutcome {
    pub token: QueueToken,
    /// false when an existing live token for (user, event) was returned
    pub created: bool,
}

/// Arguments for the atomic seat hold operation
#[derive(Debug, Clone)]
pub struct HoldRequest {
    pub reservation_id: Uuid,
    pub token_id: Uuid,
    pub user_id: String,
    pub event_id: Uuid,
    pub seat_number: u32,
    pub now: DateTime<Utc>,
    pub hold_ttl: Duration,
}

#[derive(Debug, Clone)]
pub enum ReleaseOutcome {
    /// The reservation transitioned HOLDING -> target and its seat was freed
    Released(Reservation),
    /// Nothing to do; the reservation already reached a terminal state
    AlreadyTerminal(ReservationStatus),
    NotFound,
}

/// Arguments for the atomic settle operation
#[derive(Debug, Clone)]
pub struct SettleRequest {
    pub reservation_id: Uuid,
    pub user_id: String,
    pub amount: i64,
    /// Version read by the caller; the write is rejected if it moved
    pub expected_version: u64,
    pub receipt_id: Uuid,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum SettleOutcome {
    Settled(Receipt),
    /// The reservation was already CONFIRMED; the original receipt is returned
    AlreadySettled(Receipt),
    /// Balance version moved between read and write
    VersionConflict { current: u64 },
    InsufficientFunds { available: i64 },
    /// Reservation exists but is EXPIRED or CANCELLED
    NotHolding { status: ReservationStatus },
    HoldLapsed,
    WrongUser,
    NotFound,
}

/// Port to the shared atomic store backing every state transition.
///
/// Each method is one atomic unit: implementations must guarantee that the
/// whole operation either applies or does not, across arbitrarily many
/// service instances. No caller may assume in-process mutual exclusion.
#[async_trait]
pub trait TokenStore: Send + Sync {
    // --- admission queue ---

    /// Create a WAITING token for (user, event), or return the live one.
    /// When the waiting queue is empty and the ACTIVE count is below
    /// capacity, the new token is activated inside the same atomic unit.
    async fn enqueue_token(&self, req: EnqueueRequest) -> Result<EnqueueOutcome, BookingError>;

    async fn get_token(&self, token_id: Uuid) -> Result<Option<QueueToken>, BookingError>;

    async fn active_count(&self, event_id: Uuid) -> Result<u64, BookingError>;

    /// 0-based FIFO rank of a token among its event's WAITING tokens
    async fn waiting_rank(&self, event_id: Uuid, token_id: Uuid)
        -> Result<Option<u64>, BookingError>;

    /// Promote up to (capacity - active) WAITING tokens in FIFO order.
    /// Returns the promoted token ids.
    async fn promote_waiting(
        &self,
        event_id: Uuid,
        now: DateTime<Utc>,
        capacity: u32,
        active_ttl: Duration,
    ) -> Result<Vec<Uuid>, BookingError>;

    /// Expire ACTIVE tokens whose TTL elapsed before `now`; returns the count
    async fn expire_active_tokens(
        &self,
        event_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, BookingError>;

    /// Expire WAITING tokens issued more than `waiting_ttl` before `now`
    async fn expire_waiting_tokens(
        &self,
        event_id: Uuid,
        now: DateTime<Utc>,
        waiting_ttl: Duration,
    ) -> Result<u64, BookingError>;

    /// Every event id ever seen by enqueue or seeding; drives the sweeps
    async fn list_event_ids(&self) -> Result<Vec<Uuid>, BookingError>;

    // --- events & seats ---

    /// Seed an event and its seats, all AVAILABLE
    async fn create_event(&self, event: &EventRecord) -> Result<(), BookingError>;

    async fn get_event(&self, event_id: Uuid) -> Result<Option<EventRecord>, BookingError>;

    async fn list_seats(&self, event_id: Uuid) -> Result<Vec<Seat>, BookingError>;

    /// The double-booking linchpin: verify the admission token is usable,
    /// compare-and-set the seat AVAILABLE -> HELD, and write the HOLDING
    /// reservation, all in one atomic unit. Under N concurrent calls for one
    /// seat exactly one succeeds.
    async fn hold_seat(&self, req: HoldRequest) -> Result<Reservation, BookingError>;

    async fn get_reservation(
        &self,
        reservation_id: Uuid,
    ) -> Result<Option<Reservation>, BookingError>;

    /// CAS the reservation HOLDING -> target (EXPIRED or CANCELLED) and free
    /// its seat. Safe to call redundantly.
    async fn release_hold(
        &self,
        reservation_id: Uuid,
        target: ReservationStatus,
        now: DateTime<Utc>,
    ) -> Result<ReleaseOutcome, BookingError>;

    /// Reservation ids whose hold window lapsed before `now`
    async fn due_holds(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Uuid>, BookingError>;

    // --- balances & settlement ---

    async fn get_balance(&self, user_id: &str) -> Result<Option<Balance>, BookingError>;

    /// Atomic credit; creates the balance on first charge
    async fn charge_balance(
        &self,
        user_id: &str,
        amount: i64,
    ) -> Result<Balance, BookingError>;

    async fn get_receipt(&self, reservation_id: Uuid) -> Result<Option<Receipt>, BookingError>;

    /// One atomic unit: re-validate the hold, version-check and debit the
    /// balance, mark the seat SOLD and the reservation CONFIRMED, write the
    /// receipt, and destroy the admission token.
    async fn settle_payment(&self, req: SettleRequest) -> Result<SettleOutcome, BookingError>;
}
