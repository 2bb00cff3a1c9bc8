use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use marquee_core::error::BookingError;
use marquee_core::models::{Reservation, ReservationStatus};
use marquee_core::store::{ReleaseOutcome, TokenStore};

/// What one sweep accomplished. Released reservations are returned whole
/// so the caller can fan out seat events for them.
#[derive(Debug, Default)]
pub struct ReaperReport {
    pub released_holds: Vec<Reservation>,
    pub expired_active: u64,
    pub expired_waiting: u64,
}

/// Background janitor. Frees seats whose hold lapsed without payment and
/// expires queue tokens past their TTL, so capacity flows back to the
/// people still waiting.
#[derive(Clone)]
pub struct Reaper {
    store: Arc<dyn TokenStore>,
    waiting_ttl: Duration,
    sweep_limit: usize,
}

impl Reaper {
    pub fn new(store: Arc<dyn TokenStore>, waiting_ttl: Duration, sweep_limit: usize) -> Self {
        Self {
            store,
            waiting_ttl,
            sweep_limit,
        }
    }

    /// One pass: lapsed holds first, then token TTLs per event. Safe to run
    /// from several instances at once; each hold resolves exactly once.
    pub async fn run_reaper_sweep(&self, now: DateTime<Utc>) -> Result<ReaperReport, BookingError> {
        let mut report = ReaperReport::default();

        let due = self.store.due_holds(now, self.sweep_limit).await?;
        for reservation_id in due {
            match self
                .store
                .release_hold(reservation_id, ReservationStatus::Expired, now)
                .await?
            {
                ReleaseOutcome::Released(reservation) => {
                    info!(
                        reservation_id = %reservation.reservation_id,
                        event_id = %reservation.event_id,
                        seat = reservation.seat_number,
                        "lapsed hold released"
                    );
                    report.released_holds.push(reservation);
                }
                // Raced with a settlement, a cancel or another reaper
                ReleaseOutcome::AlreadyTerminal(_) | ReleaseOutcome::NotFound => {}
            }
        }

        for event_id in self.store.list_event_ids().await? {
            report.expired_active += self.store.expire_active_tokens(event_id, now).await?;
            report.expired_waiting += self
                .store
                .expire_waiting_tokens(event_id, now, self.waiting_ttl)
                .await?;
        }

        if report.released_holds.is_empty()
            && report.expired_active == 0
            && report.expired_waiting == 0
        {
            debug!("reaper sweep found nothing to do");
        } else {
            info!(
                released = report.released_holds.len(),
                expired_active = report.expired_active,
                expired_waiting = report.expired_waiting,
                "reaper sweep finished"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    use marquee_core::memory::MemoryStore;
    use marquee_core::models::{EventRecord, SeatStatus, TokenStatus};
    use marquee_core::store::{EnqueueRequest, HoldRequest};

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

    async fn enqueue_at(
        store: &MemoryStore,
        user: &str,
        event_id: Uuid,
        now: DateTime<Utc>,
        capacity: u32,
    ) -> Uuid {
        store
            .enqueue_token(EnqueueRequest {
                token_id: Uuid::new_v4(),
                user_id: user.to_string(),
                event_id,
                now,
                capacity,
                active_ttl: Duration::minutes(10),
                waiting_ttl: Duration::hours(1),
            })
            .await
            .unwrap()
            .token
            .token_id
    }

    async fn hold_at(
        store: &MemoryStore,
        token_id: Uuid,
        user: &str,
        event_id: Uuid,
        seat_number: u32,
        now: DateTime<Utc>,
    ) -> Uuid {
        store
            .hold_seat(HoldRequest {
                reservation_id: Uuid::new_v4(),
                token_id,
                user_id: user.to_string(),
                event_id,
                seat_number,
                now,
                hold_ttl: Duration::minutes(5),
            })
            .await
            .unwrap()
            .reservation_id
    }

    #[tokio::test]
    async fn test_sweep_releases_lapsed_holds_then_expires_tokens() {
        let store = Arc::new(MemoryStore::new());
        let reaper = Reaper::new(store.clone(), Duration::hours(1), 512);
        let event_id = seed_event(&store, 1).await;
        let base = Utc::now();

        let alice = enqueue_at(&store, "alice", event_id, base, 1).await;
        enqueue_at(&store, "bob", event_id, base, 1).await;
        let resv_id = hold_at(&store, alice, "alice", event_id, 1, base).await;

        // Past the 5-minute hold TTL, before any token TTL
        let report = reaper
            .run_reaper_sweep(base + Duration::minutes(6))
            .await
            .unwrap();
        assert_eq!(report.released_holds.len(), 1);
        assert_eq!(report.released_holds[0].reservation_id, resv_id);
        assert_eq!(report.expired_active, 0);
        assert_eq!(report.expired_waiting, 0);

        let seats = store.list_seats(event_id).await.unwrap();
        assert_eq!(seats[0].status, SeatStatus::Available);
        assert_eq!(
            store
                .get_reservation(resv_id)
                .await
                .unwrap()
                .unwrap()
                .status,
            ReservationStatus::Expired
        );

        // Past the 10-minute active TTL
        let report = reaper
            .run_reaper_sweep(base + Duration::minutes(11))
            .await
            .unwrap();
        assert!(report.released_holds.is_empty());
        assert_eq!(report.expired_active, 1);
        assert_eq!(
            store.get_token(alice).await.unwrap().unwrap().status,
            TokenStatus::Expired
        );

        // Past the 1-hour waiting TTL
        let report = reaper
            .run_reaper_sweep(base + Duration::hours(2))
            .await
            .unwrap();
        assert_eq!(report.expired_waiting, 1);
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let reaper = Reaper::new(store.clone(), Duration::hours(1), 512);
        let event_id = seed_event(&store, 1).await;
        let base = Utc::now();

        let alice = enqueue_at(&store, "alice", event_id, base, 1).await;
        hold_at(&store, alice, "alice", event_id, 1, base).await;

        let later = base + Duration::minutes(6);
        let first = reaper.run_reaper_sweep(later).await.unwrap();
        assert_eq!(first.released_holds.len(), 1);

        let second = reaper.run_reaper_sweep(later).await.unwrap();
        assert!(second.released_holds.is_empty());
        assert_eq!(second.expired_active, 0);
        assert_eq!(second.expired_waiting, 0);
    }

    #[tokio::test]
    async fn test_sweep_limit_batches_hold_releases() {
        let store = Arc::new(MemoryStore::new());
        let reaper = Reaper::new(store.clone(), Duration::hours(1), 2);
        let event_id = seed_event(&store, 3).await;
        let base = Utc::now();

        for (i, user) in ["u1", "u2", "u3"].iter().enumerate() {
            let token = enqueue_at(&store, user, event_id, base, 100).await;
            hold_at(
                &store,
                token,
                user,
                event_id,
                i as u32 + 1,
                base + Duration::seconds(i as i64),
            )
            .await;
        }

        let later = base + Duration::minutes(6);
        let first = reaper.run_reaper_sweep(later).await.unwrap();
        assert_eq!(first.released_holds.len(), 2);

        let second = reaper.run_reaper_sweep(later).await.unwrap();
        assert_eq!(second.released_holds.len(), 1);
    }
}
