use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use marquee_core::error::BookingError;
use marquee_core::models::{Balance, Receipt};
use marquee_core::store::{SettleOutcome, SettleRequest, TokenStore};

use crate::retry::RetryPolicy;

/// Outcome of a settlement call. Duplicate requests succeed and carry the
/// receipt recorded by the first one.
#[derive(Debug, Clone)]
pub enum SettleResult {
    Settled(Receipt),
    Duplicate(Receipt),
}

impl SettleResult {
    pub fn receipt(&self) -> &Receipt {
        match self {
            SettleResult::Settled(receipt) | SettleResult::Duplicate(receipt) => receipt,
        }
    }
}

/// Idempotent payment settlement against the versioned balance ledger.
#[derive(Clone)]
pub struct PaymentSettlement {
    store: Arc<dyn TokenStore>,
    retry: RetryPolicy,
}

impl PaymentSettlement {
    pub fn new(store: Arc<dyn TokenStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Settles a held reservation: debits the balance, confirms the
    /// reservation and marks the seat sold in one store operation.
    /// Version conflicts and transient store failures are retried with
    /// backoff; every attempt re-reads the balance first. The receipt id
    /// is minted once, so a retry that lands on an already-applied
    /// settlement just gets the stored receipt back.
    pub async fn settle(
        &self,
        reservation_id: Uuid,
        user_id: &str,
        amount: i64,
    ) -> Result<SettleResult, BookingError> {
        if amount <= 0 {
            return Err(BookingError::InvalidAmount(amount));
        }

        let receipt_id = Uuid::new_v4();
        let mut attempt = 0u32;
        loop {
            let version = match self.store.get_balance(user_id).await? {
                Some(balance) => balance.version,
                None => 0,
            };
            let outcome = self
                .store
                .settle_payment(SettleRequest {
                    reservation_id,
                    user_id: user_id.to_string(),
                    amount,
                    expected_version: version,
                    receipt_id,
                    now: Utc::now(),
                })
                .await;

            match outcome {
                Ok(SettleOutcome::Settled(receipt)) => {
                    info!(
                        reservation_id = %reservation_id,
                        user_id,
                        amount,
                        balance_after = receipt.balance_after,
                        "payment settled"
                    );
                    return Ok(SettleResult::Settled(receipt));
                }
                Ok(SettleOutcome::AlreadySettled(receipt)) => {
                    debug!(
                        reservation_id = %reservation_id,
                        "duplicate settlement, returning stored receipt"
                    );
                    return Ok(SettleResult::Duplicate(receipt));
                }
                Ok(SettleOutcome::VersionConflict { current }) => {
                    if !self.retry.attempts_left(attempt) {
                        warn!(
                            reservation_id = %reservation_id,
                            attempts = attempt + 1,
                            "settlement gave up after repeated version conflicts"
                        );
                        return Err(BookingError::StoreUnavailable(
                            "balance version conflicts exhausted retries".to_string(),
                        ));
                    }
                    debug!(
                        reservation_id = %reservation_id,
                        expected = version,
                        current,
                        "balance version conflict, retrying"
                    );
                    tokio::time::sleep(self.retry.backoff(attempt)).await;
                    attempt += 1;
                }
                Ok(SettleOutcome::InsufficientFunds { available }) => {
                    return Err(BookingError::InsufficientBalance {
                        available,
                        requested: amount,
                    });
                }
                Ok(SettleOutcome::HoldLapsed) | Ok(SettleOutcome::NotHolding { .. }) => {
                    return Err(BookingError::ReservationNotHolding(reservation_id));
                }
                Ok(SettleOutcome::WrongUser) | Ok(SettleOutcome::NotFound) => {
                    return Err(BookingError::ReservationNotFound(reservation_id));
                }
                Err(err) if err.is_retryable() && self.retry.attempts_left(attempt) => {
                    warn!(
                        reservation_id = %reservation_id,
                        error = %err,
                        "transient settlement failure, retrying"
                    );
                    tokio::time::sleep(self.retry.backoff(attempt)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Credits a user's balance.
    pub async fn charge(&self, user_id: &str, amount: i64) -> Result<Balance, BookingError> {
        if amount <= 0 {
            return Err(BookingError::InvalidAmount(amount));
        }
        let balance = self.store.charge_balance(user_id, amount).await?;
        info!(user_id, amount, balance = balance.amount, "balance credited");
        Ok(balance)
    }

    /// Current balance, zero for a user never seen before.
    pub async fn balance_of(&self, user_id: &str) -> Result<Balance, BookingError> {
        Ok(self
            .store
            .get_balance(user_id)
            .await?
            .unwrap_or_else(|| Balance::zero(user_id.to_string())))
    }

    /// Receipt lookup for the caller's own settled reservation.
    pub async fn receipt_of(
        &self,
        reservation_id: Uuid,
        user_id: &str,
    ) -> Result<Receipt, BookingError> {
        let receipt = self
            .store
            .get_receipt(reservation_id)
            .await?
            .ok_or(BookingError::ReservationNotFound(reservation_id))?;
        if receipt.user_id != user_id {
            return Err(BookingError::ReservationNotFound(reservation_id));
        }
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use chrono::{DateTime, Duration, Utc};

    use marquee_core::memory::MemoryStore;
    use marquee_core::models::{
        EventRecord, QueueToken, Reservation, ReservationStatus, Seat,
    };
    use marquee_core::store::{
        EnqueueOutcome, EnqueueRequest, HoldRequest, ReleaseOutcome,
    };

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_backoff: std::time::Duration::from_millis(1),
        }
    }

    async fn seed_hold(store: &MemoryStore, user: &str) -> Reservation {
        let event = EventRecord {
            event_id: Uuid::new_v4(),
            name: "test event".to_string(),
            seat_count: 1,
            price: 150_000,
            created_at: Utc::now(),
        };
        store.create_event(&event).await.unwrap();
        let token = store
            .enqueue_token(EnqueueRequest {
                token_id: Uuid::new_v4(),
                user_id: user.to_string(),
                event_id: event.event_id,
                now: Utc::now(),
                capacity: 100,
                active_ttl: Duration::minutes(10),
                waiting_ttl: Duration::hours(1),
            })
            .await
            .unwrap()
            .token;
        store
            .hold_seat(HoldRequest {
                reservation_id: Uuid::new_v4(),
                token_id: token.token_id,
                user_id: user.to_string(),
                event_id: event.event_id,
                seat_number: 1,
                now: Utc::now(),
                hold_ttl: Duration::minutes(5),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_settle_happy_path_then_duplicate() {
        let store = Arc::new(MemoryStore::new());
        let payments = PaymentSettlement::new(store.clone(), fast_retry());
        let resv = seed_hold(&store, "alice").await;
        payments.charge("alice", 15_000).await.unwrap();

        let first = payments
            .settle(resv.reservation_id, "alice", 10_000)
            .await
            .unwrap();
        let receipt = match &first {
            SettleResult::Settled(receipt) => receipt.clone(),
            other => panic!("expected Settled, got {:?}", other),
        };
        assert_eq!(receipt.balance_after, 5_000);

        let second = payments
            .settle(resv.reservation_id, "alice", 10_000)
            .await
            .unwrap();
        match second {
            SettleResult::Duplicate(stored) => {
                assert_eq!(stored.receipt_id, receipt.receipt_id)
            }
            other => panic!("expected Duplicate, got {:?}", other),
        }
        assert_eq!(payments.balance_of("alice").await.unwrap().amount, 5_000);
    }

    #[tokio::test]
    async fn test_settle_insufficient_funds_leaves_hold_intact() {
        let store = Arc::new(MemoryStore::new());
        let payments = PaymentSettlement::new(store.clone(), fast_retry());
        let resv = seed_hold(&store, "alice").await;
        payments.charge("alice", 5_000).await.unwrap();

        let err = payments
            .settle(resv.reservation_id, "alice", 10_000)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BookingError::InsufficientBalance {
                available: 5_000,
                requested: 10_000
            }
        ));

        let stored = store
            .get_reservation(resv.reservation_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, ReservationStatus::Holding);
        assert_eq!(payments.balance_of("alice").await.unwrap().amount, 5_000);
    }

    #[tokio::test]
    async fn test_settle_rejects_non_positive_amounts() {
        let store = Arc::new(MemoryStore::new());
        let payments = PaymentSettlement::new(store, fast_retry());
        for amount in [0, -500] {
            let err = payments
                .settle(Uuid::new_v4(), "alice", amount)
                .await
                .unwrap_err();
            assert!(matches!(err, BookingError::InvalidAmount(_)));
        }
    }

    #[tokio::test]
    async fn test_charge_accumulates() {
        let store = Arc::new(MemoryStore::new());
        let payments = PaymentSettlement::new(store, fast_retry());
        payments.charge("alice", 5_000).await.unwrap();
        let balance = payments.charge("alice", 5_000).await.unwrap();
        assert_eq!(balance.amount, 10_000);
        assert_eq!(balance.version, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_settles_never_overdraw() {
        let store = Arc::new(MemoryStore::new());
        let payments = PaymentSettlement::new(store.clone(), fast_retry());

        let event = EventRecord {
            event_id: Uuid::new_v4(),
            name: "test event".to_string(),
            seat_count: 2,
            price: 150_000,
            created_at: Utc::now(),
        };
        store.create_event(&event).await.unwrap();
        let token = store
            .enqueue_token(EnqueueRequest {
                token_id: Uuid::new_v4(),
                user_id: "alice".to_string(),
                event_id: event.event_id,
                now: Utc::now(),
                capacity: 100,
                active_ttl: Duration::minutes(10),
                waiting_ttl: Duration::hours(1),
            })
            .await
            .unwrap()
            .token;
        let mut reservations = Vec::new();
        for seat in [1, 2] {
            reservations.push(
                store
                    .hold_seat(HoldRequest {
                        reservation_id: Uuid::new_v4(),
                        token_id: token.token_id,
                        user_id: "alice".to_string(),
                        event_id: event.event_id,
                        seat_number: seat,
                        now: Utc::now(),
                        hold_ttl: Duration::minutes(5),
                    })
                    .await
                    .unwrap(),
            );
        }
        payments.charge("alice", 10_000).await.unwrap();

        // Both settles race for one balance; the funds cover only one
        let mut handles = Vec::new();
        for resv in &reservations {
            let payments = payments.clone();
            let reservation_id = resv.reservation_id;
            handles.push(tokio::spawn(async move {
                payments.settle(reservation_id, "alice", 7_000).await
            }));
        }

        let mut settled = 0;
        let mut rejected = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(SettleResult::Settled(_)) => settled += 1,
                Err(BookingError::InsufficientBalance { .. }) => rejected += 1,
                other => panic!("unexpected outcome: {:?}", other),
            }
        }
        assert_eq!(settled, 1);
        assert_eq!(rejected, 1);

        let balance = payments.balance_of("alice").await.unwrap();
        assert_eq!(balance.amount, 3_000);
    }

    /// Store double that reports a version conflict for the first
    /// `conflicts` settle attempts, then settles.
    struct ConflictStore {
        conflicts: u32,
        attempts: AtomicU32,
    }

    impl ConflictStore {
        fn new(conflicts: u32) -> Self {
            Self {
                conflicts,
                attempts: AtomicU32::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl TokenStore for ConflictStore {
        async fn get_balance(&self, user_id: &str) -> Result<Option<Balance>, BookingError> {
            Ok(Some(Balance {
                user_id: user_id.to_string(),
                amount: 100_000,
                version: 5,
            }))
        }

        async fn settle_payment(
            &self,
            req: SettleRequest,
        ) -> Result<SettleOutcome, BookingError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.conflicts {
                return Ok(SettleOutcome::VersionConflict { current: 6 });
            }
            Ok(SettleOutcome::Settled(Receipt {
                receipt_id: req.receipt_id,
                reservation_id: req.reservation_id,
                user_id: req.user_id,
                amount: req.amount,
                balance_after: 100_000 - req.amount,
                settled_at: req.now,
            }))
        }

        async fn enqueue_token(
            &self,
            _req: EnqueueRequest,
        ) -> Result<EnqueueOutcome, BookingError> {
            unimplemented!()
        }

        async fn get_token(&self, _token_id: Uuid) -> Result<Option<QueueToken>, BookingError> {
            unimplemented!()
        }

        async fn active_count(&self, _event_id: Uuid) -> Result<u64, BookingError> {
            unimplemented!()
        }

        async fn waiting_rank(
            &self,
            _event_id: Uuid,
            _token_id: Uuid,
        ) -> Result<Option<u64>, BookingError> {
            unimplemented!()
        }

        async fn promote_waiting(
            &self,
            _event_id: Uuid,
            _now: DateTime<Utc>,
            _capacity: u32,
            _active_ttl: Duration,
        ) -> Result<Vec<Uuid>, BookingError> {
            unimplemented!()
        }

        async fn expire_active_tokens(
            &self,
            _event_id: Uuid,
            _now: DateTime<Utc>,
        ) -> Result<u64, BookingError> {
            unimplemented!()
        }

        async fn expire_waiting_tokens(
            &self,
            _event_id: Uuid,
            _now: DateTime<Utc>,
            _waiting_ttl: Duration,
        ) -> Result<u64, BookingError> {
            unimplemented!()
        }

        async fn list_event_ids(&self) -> Result<Vec<Uuid>, BookingError> {
            unimplemented!()
        }

        async fn create_event(&self, _event: &EventRecord) -> Result<(), BookingError> {
            unimplemented!()
        }

        async fn get_event(&self, _event_id: Uuid) -> Result<Option<EventRecord>, BookingError> {
            unimplemented!()
        }

        async fn list_seats(&self, _event_id: Uuid) -> Result<Vec<Seat>, BookingError> {
            unimplemented!()
        }

        async fn hold_seat(&self, _req: HoldRequest) -> Result<Reservation, BookingError> {
            unimplemented!()
        }

        async fn get_reservation(
            &self,
            _reservation_id: Uuid,
        ) -> Result<Option<Reservation>, BookingError> {
            unimplemented!()
        }

        async fn release_hold(
            &self,
            _reservation_id: Uuid,
            _target: ReservationStatus,
            _now: DateTime<Utc>,
        ) -> Result<ReleaseOutcome, BookingError> {
            unimplemented!()
        }

        async fn due_holds(
            &self,
            _now: DateTime<Utc>,
            _limit: usize,
        ) -> Result<Vec<Uuid>, BookingError> {
            unimplemented!()
        }

        async fn charge_balance(
            &self,
            _user_id: &str,
            _amount: i64,
        ) -> Result<Balance, BookingError> {
            unimplemented!()
        }

        async fn get_receipt(
            &self,
            _reservation_id: Uuid,
        ) -> Result<Option<Receipt>, BookingError> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn test_settle_recovers_after_version_conflict() {
        let store = Arc::new(ConflictStore::new(1));
        let payments = PaymentSettlement::new(store.clone(), fast_retry());

        let result = payments
            .settle(Uuid::new_v4(), "alice", 10_000)
            .await
            .unwrap();
        assert!(matches!(result, SettleResult::Settled(_)));
        assert_eq!(store.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_settle_gives_up_after_repeated_conflicts() {
        let store = Arc::new(ConflictStore::new(u32::MAX));
        let payments = PaymentSettlement::new(store.clone(), fast_retry());

        let err = payments
            .settle(Uuid::new_v4(), "alice", 10_000)
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::StoreUnavailable(_)));
        assert_eq!(store.attempts.load(Ordering::SeqCst), 3);
    }
}
