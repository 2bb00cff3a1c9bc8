use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::error::BookingError;
use crate::models::{
    Balance, EventRecord, QueueToken, Receipt, Reservation, ReservationStatus, Seat, SeatStatus,
    TokenStatus,
};
use crate::store::{
    EnqueueOutcome, EnqueueRequest, HoldRequest, ReleaseOutcome, SettleOutcome, SettleRequest,
    TokenStore,
};

#[derive(Debug, Clone)]
struct SeatSlot {
    status: SeatStatus,
    reservation_id: Option<Uuid>,
}

#[derive(Default)]
struct MemoryInner {
    events: HashMap<Uuid, EventRecord>,
    known_events: BTreeSet<Uuid>,
    seats: HashMap<(Uuid, u32), SeatSlot>,
    tokens: HashMap<Uuid, QueueToken>,
    user_tokens: HashMap<(Uuid, String), Uuid>,
    // FIFO sets keyed by (epoch millis, id); BTreeSet ordering gives the
    // issued-at scan with id tie-break for free
    waiting: HashMap<Uuid, BTreeSet<(i64, Uuid)>>,
    active: HashMap<Uuid, BTreeSet<(i64, Uuid)>>,
    reservations: HashMap<Uuid, Reservation>,
    due: BTreeSet<(i64, Uuid)>,
    balances: HashMap<String, Balance>,
    receipts: HashMap<Uuid, Receipt>,
}

/// Single-process implementation of the atomic store, used by tests and
/// local development. One mutex-guarded critical section per operation
/// mirrors the one-script-per-operation contract of the production store;
/// it is not the production path.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

fn ms(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryInner>, BookingError> {
        self.inner
            .lock()
            .map_err(|_| BookingError::StoreUnavailable("memory store lock poisoned".to_string()))
    }
}

impl MemoryInner {
    fn drop_user_mapping(&mut self, event_id: Uuid, user_id: &str, token_id: Uuid) {
        let key = (event_id, user_id.to_string());
        if self.user_tokens.get(&key) == Some(&token_id) {
            self.user_tokens.remove(&key);
        }
    }

    fn free_seat(&mut self, event_id: Uuid, seat_number: u32, reservation_id: Uuid) {
        if let Some(slot) = self.seats.get_mut(&(event_id, seat_number)) {
            if slot.reservation_id == Some(reservation_id) {
                slot.status = SeatStatus::Available;
                slot.reservation_id = None;
            }
        }
    }

    fn destroy_token(&mut self, token_id: Uuid) {
        if let Some(token) = self.tokens.remove(&token_id) {
            if let Some(set) = self.active.get_mut(&token.event_id) {
                set.retain(|(_, id)| *id != token_id);
            }
            if let Some(set) = self.waiting.get_mut(&token.event_id) {
                set.retain(|(_, id)| *id != token_id);
            }
            self.drop_user_mapping(token.event_id, &token.user_id, token_id);
        }
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn enqueue_token(&self, req: EnqueueRequest) -> Result<EnqueueOutcome, BookingError> {
        let mut inner = self.lock()?;
        let map_key = (req.event_id, req.user_id.clone());

        if let Some(existing_id) = inner.user_tokens.get(&map_key).copied() {
            if let Some(token) = inner.tokens.get(&existing_id) {
                if token.status != TokenStatus::Expired {
                    return Ok(EnqueueOutcome {
                        token: token.clone(),
                        created: false,
                    });
                }
            }
            inner.user_tokens.remove(&map_key);
        }

        inner.known_events.insert(req.event_id);
        let mut token = QueueToken::new_waiting(
            req.token_id,
            req.user_id.clone(),
            req.event_id,
            req.now,
            req.waiting_ttl,
        );

        let waiting_empty = inner
            .waiting
            .get(&req.event_id)
            .map_or(true, |set| set.is_empty());
        let active_count = inner.active.get(&req.event_id).map_or(0, |set| set.len());

        if waiting_empty && (active_count as u64) < u64::from(req.capacity) {
            token.activate(req.now, req.active_ttl);
            inner
                .active
                .entry(req.event_id)
                .or_default()
                .insert((ms(token.expires_at), token.token_id));
        } else {
            inner
                .waiting
                .entry(req.event_id)
                .or_default()
                .insert((ms(token.issued_at), token.token_id));
        }

        inner.user_tokens.insert(map_key, token.token_id);
        inner.tokens.insert(token.token_id, token.clone());
        Ok(EnqueueOutcome {
            token,
            created: true,
        })
    }

    async fn get_token(&self, token_id: Uuid) -> Result<Option<QueueToken>, BookingError> {
        Ok(self.lock()?.tokens.get(&token_id).cloned())
    }

    async fn active_count(&self, event_id: Uuid) -> Result<u64, BookingError> {
        Ok(self.lock()?.active.get(&event_id).map_or(0, |s| s.len()) as u64)
    }

    async fn waiting_rank(
        &self,
        event_id: Uuid,
        token_id: Uuid,
    ) -> Result<Option<u64>, BookingError> {
        let inner = self.lock()?;
        let Some(set) = inner.waiting.get(&event_id) else {
            return Ok(None);
        };
        Ok(set
            .iter()
            .position(|(_, id)| *id == token_id)
            .map(|rank| rank as u64))
    }

    async fn promote_waiting(
        &self,
        event_id: Uuid,
        now: DateTime<Utc>,
        capacity: u32,
        active_ttl: Duration,
    ) -> Result<Vec<Uuid>, BookingError> {
        let mut inner = self.lock()?;
        let active_count = inner.active.get(&event_id).map_or(0, |s| s.len());
        let slots = (capacity as usize).saturating_sub(active_count);
        if slots == 0 {
            return Ok(Vec::new());
        }

        let batch: Vec<(i64, Uuid)> = inner
            .waiting
            .get(&event_id)
            .map(|set| set.iter().take(slots).copied().collect())
            .unwrap_or_default();

        let mut promoted = Vec::with_capacity(batch.len());
        for entry in batch {
            if let Some(set) = inner.waiting.get_mut(&event_id) {
                set.remove(&entry);
            }
            let expires = inner.tokens.get_mut(&entry.1).map(|token| {
                token.activate(now, active_ttl);
                ms(token.expires_at)
            });
            if let Some(expires) = expires {
                inner
                    .active
                    .entry(event_id)
                    .or_default()
                    .insert((expires, entry.1));
                promoted.push(entry.1);
            }
        }
        Ok(promoted)
    }

    async fn expire_active_tokens(
        &self,
        event_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, BookingError> {
        let mut inner = self.lock()?;
        let cutoff = ms(now);
        let stale: Vec<(i64, Uuid)> = inner
            .active
            .get(&event_id)
            .map(|set| {
                set.iter()
                    .take_while(|(expires, _)| *expires < cutoff)
                    .copied()
                    .collect()
            })
            .unwrap_or_default();

        for entry in &stale {
            if let Some(set) = inner.active.get_mut(&event_id) {
                set.remove(entry);
            }
            let owner = inner.tokens.get_mut(&entry.1).map(|token| {
                token.expire();
                token.user_id.clone()
            });
            if let Some(user_id) = owner {
                inner.drop_user_mapping(event_id, &user_id, entry.1);
            }
        }
        Ok(stale.len() as u64)
    }

    async fn expire_waiting_tokens(
        &self,
        event_id: Uuid,
        now: DateTime<Utc>,
        waiting_ttl: Duration,
    ) -> Result<u64, BookingError> {
        let mut inner = self.lock()?;
        let cutoff = ms(now - waiting_ttl);
        let stale: Vec<(i64, Uuid)> = inner
            .waiting
            .get(&event_id)
            .map(|set| {
                set.iter()
                    .take_while(|(issued, _)| *issued < cutoff)
                    .copied()
                    .collect()
            })
            .unwrap_or_default();

        for entry in &stale {
            if let Some(set) = inner.waiting.get_mut(&event_id) {
                set.remove(entry);
            }
            let owner = inner.tokens.get_mut(&entry.1).map(|token| {
                token.expire();
                token.user_id.clone()
            });
            if let Some(user_id) = owner {
                inner.drop_user_mapping(event_id, &user_id, entry.1);
            }
        }
        Ok(stale.len() as u64)
    }

    async fn list_event_ids(&self) -> Result<Vec<Uuid>, BookingError> {
        Ok(self.lock()?.known_events.iter().copied().collect())
    }

    async fn create_event(&self, event: &EventRecord) -> Result<(), BookingError> {
        let mut inner = self.lock()?;
        inner.known_events.insert(event.event_id);
        for seat_number in 1..=event.seat_count {
            inner.seats.insert(
                (event.event_id, seat_number),
                SeatSlot {
                    status: SeatStatus::Available,
                    reservation_id: None,
                },
            );
        }
        inner.events.insert(event.event_id, event.clone());
        Ok(())
    }

    async fn get_event(&self, event_id: Uuid) -> Result<Option<EventRecord>, BookingError> {
        Ok(self.lock()?.events.get(&event_id).cloned())
    }

    async fn list_seats(&self, event_id: Uuid) -> Result<Vec<Seat>, BookingError> {
        let inner = self.lock()?;
        let Some(event) = inner.events.get(&event_id) else {
            return Ok(Vec::new());
        };
        let mut seats = Vec::with_capacity(event.seat_count as usize);
        for seat_number in 1..=event.seat_count {
            if let Some(slot) = inner.seats.get(&(event_id, seat_number)) {
                seats.push(Seat {
                    event_id,
                    seat_number,
                    status: slot.status,
                    reservation_id: slot.reservation_id,
                    price: event.price,
                });
            }
        }
        Ok(seats)
    }

    async fn hold_seat(&self, req: HoldRequest) -> Result<Reservation, BookingError> {
        let mut inner = self.lock()?;

        let token = inner
            .tokens
            .get(&req.token_id)
            .ok_or(BookingError::TokenNotFound(req.token_id))?;
        if token.user_id != req.user_id || token.event_id != req.event_id {
            return Err(BookingError::AdmissionRequired);
        }
        if token.is_expired(req.now) {
            return Err(BookingError::TokenExpired(req.token_id));
        }
        if !token.is_usable(req.now) {
            return Err(BookingError::AdmissionRequired);
        }

        let slot = inner
            .seats
            .get(&(req.event_id, req.seat_number))
            .ok_or(BookingError::SeatNotFound {
                event_id: req.event_id,
                seat_number: req.seat_number,
            })?;
        if slot.status != SeatStatus::Available {
            return Err(BookingError::SeatUnavailable {
                event_id: req.event_id,
                seat_number: req.seat_number,
            });
        }

        let reservation = Reservation::new_holding(
            req.reservation_id,
            req.user_id.clone(),
            req.event_id,
            req.seat_number,
            req.token_id,
            req.now,
            req.hold_ttl,
        );

        inner.seats.insert(
            (req.event_id, req.seat_number),
            SeatSlot {
                status: SeatStatus::Held,
                reservation_id: Some(req.reservation_id),
            },
        );
        inner
            .due
            .insert((ms(reservation.hold_expires_at), req.reservation_id));
        inner
            .reservations
            .insert(req.reservation_id, reservation.clone());
        Ok(reservation)
    }

    async fn get_reservation(
        &self,
        reservation_id: Uuid,
    ) -> Result<Option<Reservation>, BookingError> {
        Ok(self.lock()?.reservations.get(&reservation_id).cloned())
    }

    async fn release_hold(
        &self,
        reservation_id: Uuid,
        target: ReservationStatus,
        _now: DateTime<Utc>,
    ) -> Result<ReleaseOutcome, BookingError> {
        // Release only lapses or cancels; confirmation goes through settlement.
        if !target.is_terminal() || target == ReservationStatus::Confirmed {
            return Err(BookingError::InvalidReservationState {
                from: ReservationStatus::Holding.as_str().to_string(),
                to: target.as_str().to_string(),
            });
        }
        let mut inner = self.lock()?;
        let Some(current) = inner.reservations.get(&reservation_id).cloned() else {
            return Ok(ReleaseOutcome::NotFound);
        };
        if current.status.is_terminal() {
            return Ok(ReleaseOutcome::AlreadyTerminal(current.status));
        }

        inner.free_seat(current.event_id, current.seat_number, reservation_id);
        inner
            .due
            .remove(&(ms(current.hold_expires_at), reservation_id));
        let updated = inner
            .reservations
            .get_mut(&reservation_id)
            .map(|resv| {
                resv.status = target;
                resv.clone()
            })
            .ok_or_else(|| {
                BookingError::StoreUnavailable("reservation vanished mid-release".to_string())
            })?;
        Ok(ReleaseOutcome::Released(updated))
    }

    async fn due_holds(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Uuid>, BookingError> {
        let inner = self.lock()?;
        let cutoff = ms(now);
        Ok(inner
            .due
            .iter()
            .take_while(|(expires, _)| *expires < cutoff)
            .take(limit)
            .map(|(_, id)| *id)
            .collect())
    }

    async fn get_balance(&self, user_id: &str) -> Result<Option<Balance>, BookingError> {
        Ok(self.lock()?.balances.get(user_id).cloned())
    }

    async fn charge_balance(&self, user_id: &str, amount: i64) -> Result<Balance, BookingError> {
        let mut inner = self.lock()?;
        let balance = inner
            .balances
            .entry(user_id.to_string())
            .or_insert_with(|| Balance::zero(user_id.to_string()));
        balance.amount += amount;
        balance.version += 1;
        Ok(balance.clone())
    }

    async fn get_receipt(&self, reservation_id: Uuid) -> Result<Option<Receipt>, BookingError> {
        Ok(self.lock()?.receipts.get(&reservation_id).cloned())
    }

    async fn settle_payment(&self, req: SettleRequest) -> Result<SettleOutcome, BookingError> {
        let mut inner = self.lock()?;

        let Some(resv) = inner.reservations.get(&req.reservation_id).cloned() else {
            return Ok(SettleOutcome::NotFound);
        };
        if resv.user_id != req.user_id {
            return Ok(SettleOutcome::WrongUser);
        }
        if resv.status == ReservationStatus::Confirmed {
            let receipt = inner
                .receipts
                .get(&req.reservation_id)
                .cloned()
                .ok_or_else(|| {
                    BookingError::StoreUnavailable(
                        "confirmed reservation has no receipt".to_string(),
                    )
                })?;
            return Ok(SettleOutcome::AlreadySettled(receipt));
        }
        if resv.status != ReservationStatus::Holding {
            return Ok(SettleOutcome::NotHolding {
                status: resv.status,
            });
        }
        if resv.hold_lapsed(req.now) {
            return Ok(SettleOutcome::HoldLapsed);
        }

        let balance = inner
            .balances
            .entry(req.user_id.clone())
            .or_insert_with(|| Balance::zero(req.user_id.clone()));
        if balance.version != req.expected_version {
            return Ok(SettleOutcome::VersionConflict {
                current: balance.version,
            });
        }
        if balance.amount < req.amount {
            return Ok(SettleOutcome::InsufficientFunds {
                available: balance.amount,
            });
        }

        balance.amount -= req.amount;
        balance.version += 1;
        let balance_after = balance.amount;

        if let Some(slot) = inner.seats.get_mut(&(resv.event_id, resv.seat_number)) {
            slot.status = SeatStatus::Sold;
        }
        inner
            .due
            .remove(&(ms(resv.hold_expires_at), req.reservation_id));
        if let Some(stored) = inner.reservations.get_mut(&req.reservation_id) {
            stored.status = ReservationStatus::Confirmed;
        }

        let receipt = Receipt {
            receipt_id: req.receipt_id,
            reservation_id: req.reservation_id,
            user_id: req.user_id.clone(),
            amount: req.amount,
            balance_after,
            settled_at: req.now,
        };
        inner.receipts.insert(req.reservation_id, receipt.clone());
        inner.destroy_token(resv.queue_token_id);
        Ok(SettleOutcome::Settled(receipt))
    }
}
