use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::info;
use uuid::Uuid;

use marquee_core::error::BookingError;
use marquee_core::models::{Reservation, ReservationStatus};
use marquee_core::store::{HoldRequest, ReleaseOutcome, TokenStore};

#[derive(Debug, Clone)]
pub struct BookingRules {
    pub hold_ttl: Duration,
}

impl Default for BookingRules {
    fn default() -> Self {
        Self {
            hold_ttl: Duration::minutes(5),
        }
    }
}

/// Seat-level mutual exclusion. A seat accepts at most one live hold;
/// every other attempt observes SeatUnavailable until that hold resolves.
#[derive(Clone)]
pub struct SeatLockManager {
    store: Arc<dyn TokenStore>,
    rules: BookingRules,
}

impl SeatLockManager {
    pub fn new(store: Arc<dyn TokenStore>, rules: BookingRules) -> Self {
        Self { store, rules }
    }

    /// Attempts to hold a seat on behalf of an admitted user. The store
    /// decides atomically. A hold is never retried: a retry after an
    /// ambiguous failure could acquire a second hold under a fresh
    /// reservation id.
    pub async fn hold(
        &self,
        token_id: Uuid,
        user_id: &str,
        event_id: Uuid,
        seat_number: u32,
    ) -> Result<Reservation, BookingError> {
        let reservation = self
            .store
            .hold_seat(HoldRequest {
                reservation_id: Uuid::new_v4(),
                token_id,
                user_id: user_id.to_string(),
                event_id,
                seat_number,
                now: Utc::now(),
                hold_ttl: self.rules.hold_ttl,
            })
            .await?;
        info!(
            reservation_id = %reservation.reservation_id,
            event_id = %event_id,
            seat = seat_number,
            user_id,
            "seat held"
        );
        Ok(reservation)
    }

    /// Cancels the caller's own hold. Cancelling a hold that already lapsed
    /// or was cancelled succeeds without changing anything; a confirmed
    /// reservation cannot be cancelled.
    pub async fn cancel(
        &self,
        reservation_id: Uuid,
        user_id: &str,
    ) -> Result<Reservation, BookingError> {
        let current = self
            .store
            .get_reservation(reservation_id)
            .await?
            .ok_or(BookingError::ReservationNotFound(reservation_id))?;
        if current.user_id != user_id {
            return Err(BookingError::ReservationNotFound(reservation_id));
        }

        match self
            .store
            .release_hold(reservation_id, ReservationStatus::Cancelled, Utc::now())
            .await?
        {
            ReleaseOutcome::Released(reservation) => {
                info!(reservation_id = %reservation_id, "hold cancelled");
                Ok(reservation)
            }
            ReleaseOutcome::AlreadyTerminal(ReservationStatus::Confirmed) => {
                Err(BookingError::InvalidReservationState {
                    from: ReservationStatus::Confirmed.as_str().to_string(),
                    to: ReservationStatus::Cancelled.as_str().to_string(),
                })
            }
            ReleaseOutcome::AlreadyTerminal(_) => {
                // Lapsed or already cancelled: the seat is free either way
                self.store
                    .get_reservation(reservation_id)
                    .await?
                    .ok_or(BookingError::ReservationNotFound(reservation_id))
            }
            ReleaseOutcome::NotFound => Err(BookingError::ReservationNotFound(reservation_id)),
        }
    }

    /// Ownership-checked fetch.
    pub async fn get(
        &self,
        reservation_id: Uuid,
        user_id: &str,
    ) -> Result<Reservation, BookingError> {
        let reservation = self
            .store
            .get_reservation(reservation_id)
            .await?
            .ok_or(BookingError::ReservationNotFound(reservation_id))?;
        if reservation.user_id != user_id {
            return Err(BookingError::ReservationNotFound(reservation_id));
        }
        Ok(reservation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marquee_core::memory::MemoryStore;
    use marquee_core::models::{EventRecord, SeatStatus};
    use marquee_core::store::{EnqueueRequest, SettleRequest};

    async fn seed_event(store: &MemoryStore, seat_count: u32) -> Uuid {
        let event = EventRecord {
            event_id: Uuid::new_v4(),
            name: "test event".to_string(),
            seat_count,
            price: 150_000,
            created_at: Utc::now(),
        };
        store.create_event(&event).await.unwrap();
        event.event_id
    }

    async fn admitted(store: &MemoryStore, user: &str, event_id: Uuid) -> Uuid {
        let out = store
            .enqueue_token(EnqueueRequest {
                token_id: Uuid::new_v4(),
                user_id: user.to_string(),
                event_id,
                now: Utc::now(),
                capacity: 100,
                active_ttl: Duration::minutes(10),
                waiting_ttl: Duration::hours(1),
            })
            .await
            .unwrap();
        out.token.token_id
    }

    #[tokio::test]
    async fn test_hold_then_cancel_frees_seat() {
        let store = Arc::new(MemoryStore::new());
        let manager = SeatLockManager::new(store.clone(), BookingRules::default());
        let event_id = seed_event(&store, 1).await;
        let token = admitted(&store, "alice", event_id).await;

        let resv = manager.hold(token, "alice", event_id, 1).await.unwrap();
        assert_eq!(resv.status, ReservationStatus::Holding);

        let cancelled = manager.cancel(resv.reservation_id, "alice").await.unwrap();
        assert_eq!(cancelled.status, ReservationStatus::Cancelled);

        let seats = store.list_seats(event_id).await.unwrap();
        assert_eq!(seats[0].status, SeatStatus::Available);

        // Cancelling again is a no-op success
        let again = manager.cancel(resv.reservation_id, "alice").await.unwrap();
        assert_eq!(again.status, ReservationStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_requires_owner() {
        let store = Arc::new(MemoryStore::new());
        let manager = SeatLockManager::new(store.clone(), BookingRules::default());
        let event_id = seed_event(&store, 1).await;
        let token = admitted(&store, "alice", event_id).await;
        let resv = manager.hold(token, "alice", event_id, 1).await.unwrap();

        let err = manager
            .cancel(resv.reservation_id, "bob")
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::ReservationNotFound(_)));
    }

    #[tokio::test]
    async fn test_cancel_after_confirm_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let manager = SeatLockManager::new(store.clone(), BookingRules::default());
        let event_id = seed_event(&store, 1).await;
        let token = admitted(&store, "alice", event_id).await;
        let resv = manager.hold(token, "alice", event_id, 1).await.unwrap();

        store.charge_balance("alice", 200_000).await.unwrap();
        store
            .settle_payment(SettleRequest {
                reservation_id: resv.reservation_id,
                user_id: "alice".to_string(),
                amount: 150_000,
                expected_version: 1,
                receipt_id: Uuid::new_v4(),
                now: Utc::now(),
            })
            .await
            .unwrap();

        let err = manager
            .cancel(resv.reservation_id, "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::InvalidReservationState { .. }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_holds_one_winner() {
        let store = Arc::new(MemoryStore::new());
        let manager = SeatLockManager::new(store.clone(), BookingRules::default());
        let event_id = seed_event(&store, 1).await;

        let mut contenders = Vec::new();
        for i in 0..6 {
            let user = format!("user-{}", i);
            let token = admitted(&store, &user, event_id).await;
            contenders.push((token, user));
        }

        let mut handles = Vec::new();
        for (token, user) in contenders {
            let manager = manager.clone();
            handles.push(tokio::spawn(async move {
                manager.hold(token, &user, event_id, 1).await
            }));
        }

        let mut won = 0;
        let mut lost = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => won += 1,
                Err(BookingError::SeatUnavailable { .. }) => lost += 1,
                Err(other) => panic!("unexpected error: {:?}", other),
            }
        }
        assert_eq!(won, 1);
        assert_eq!(lost, 5);
    }
}
