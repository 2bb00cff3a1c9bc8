use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use marquee_core::error::BookingError;
use marquee_core::models::{QueueToken, TokenStatus};
use marquee_core::store::{EnqueueRequest, TokenStore};

/// Admission parameters shared by every event queue.
#[derive(Debug, Clone)]
pub struct QueueRules {
    pub capacity: u32,
    pub promotion_interval: Duration,
    pub active_ttl: Duration,
    pub waiting_ttl: Duration,
}

impl Default for QueueRules {
    fn default() -> Self {
        Self {
            capacity: 100,
            promotion_interval: Duration::seconds(1),
            active_ttl: Duration::minutes(10),
            waiting_ttl: Duration::hours(1),
        }
    }
}

/// A caller's current standing in the queue.
#[derive(Debug, Clone)]
pub enum QueueStatus {
    /// Admitted: the token authorizes seat holds until it expires.
    Active { token: QueueToken },
    /// Still in line. Position counts everyone ahead, admitted or waiting.
    Waiting {
        token: QueueToken,
        position: u64,
        eta: Duration,
    },
}

impl QueueStatus {
    pub fn token(&self) -> &QueueToken {
        match self {
            QueueStatus::Active { token } => token,
            QueueStatus::Waiting { token, .. } => token,
        }
    }
}

/// Front door of the booking flow. Every user passes through here before
/// they may touch seats; admission is throttled per event.
pub struct AdmissionQueue {
    store: Arc<dyn TokenStore>,
    rules: QueueRules,
}

impl AdmissionQueue {
    pub fn new(store: Arc<dyn TokenStore>, rules: QueueRules) -> Self {
        Self { store, rules }
    }

    pub fn rules(&self) -> &QueueRules {
        &self.rules
    }

    /// Joins the queue for an event. Re-joining with a live token returns
    /// that token's current standing instead of minting a second one.
    pub async fn enqueue(
        &self,
        user_id: &str,
        event_id: Uuid,
    ) -> Result<QueueStatus, BookingError> {
        let outcome = self
            .store
            .enqueue_token(EnqueueRequest {
                token_id: Uuid::new_v4(),
                user_id: user_id.to_string(),
                event_id,
                now: Utc::now(),
                capacity: self.rules.capacity,
                active_ttl: self.rules.active_ttl,
                waiting_ttl: self.rules.waiting_ttl,
            })
            .await?;

        if outcome.created {
            info!(
                token_id = %outcome.token.token_id,
                event_id = %event_id,
                status = outcome.token.status.as_str(),
                "queue token issued"
            );
        } else {
            debug!(
                token_id = %outcome.token.token_id,
                event_id = %event_id,
                "existing queue token returned"
            );
        }
        self.describe(outcome.token).await
    }

    /// Standing of a previously issued token.
    pub async fn status(&self, token_id: Uuid) -> Result<QueueStatus, BookingError> {
        let token = self
            .store
            .get_token(token_id)
            .await?
            .ok_or(BookingError::TokenNotFound(token_id))?;
        self.describe(token).await
    }

    async fn describe(&self, token: QueueToken) -> Result<QueueStatus, BookingError> {
        // A token past its TTL reads as expired even before a sweep ran.
        if token.status == TokenStatus::Expired || token.is_expired(Utc::now()) {
            return Err(BookingError::TokenExpired(token.token_id));
        }
        match token.status {
            TokenStatus::Waiting => {
                let rank = self
                    .store
                    .waiting_rank(token.event_id, token.token_id)
                    .await?
                    .ok_or(BookingError::TokenNotFound(token.token_id))?;
                let active = self.store.active_count(token.event_id).await?;
                let cycles = i32::try_from(rank / u64::from(self.rules.capacity.max(1)) + 1)
                    .unwrap_or(i32::MAX);
                Ok(QueueStatus::Waiting {
                    position: active + rank,
                    eta: self.rules.promotion_interval * cycles,
                    token,
                })
            }
            _ => Ok(QueueStatus::Active { token }),
        }
    }

    /// One promotion pass over every known event. Returns how many tokens
    /// were admitted.
    pub async fn run_promotion_cycle(&self, now: DateTime<Utc>) -> Result<u64, BookingError> {
        let mut total = 0u64;
        for event_id in self.store.list_event_ids().await? {
            let promoted = self
                .store
                .promote_waiting(event_id, now, self.rules.capacity, self.rules.active_ttl)
                .await?;
            if !promoted.is_empty() {
                info!(event_id = %event_id, count = promoted.len(), "waiting tokens admitted");
            }
            total += promoted.len() as u64;
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marquee_core::memory::MemoryStore;

    fn queue_with_capacity(capacity: u32) -> (Arc<MemoryStore>, AdmissionQueue) {
        let store = Arc::new(MemoryStore::new());
        let rules = QueueRules {
            capacity,
            ..QueueRules::default()
        };
        let queue = AdmissionQueue::new(store.clone(), rules);
        (store, queue)
    }

    #[tokio::test]
    async fn test_first_user_is_admitted_immediately() {
        let (_, queue) = queue_with_capacity(1);
        let event_id = Uuid::new_v4();

        let status = queue.enqueue("alice", event_id).await.unwrap();
        match status {
            QueueStatus::Active { token } => {
                assert_eq!(token.status, TokenStatus::Active);
                assert!(token.activated_at.is_some());
            }
            other => panic!("expected Active, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_second_user_waits_with_position_and_eta() {
        let (_, queue) = queue_with_capacity(1);
        let event_id = Uuid::new_v4();

        queue.enqueue("alice", event_id).await.unwrap();
        let status = queue.enqueue("bob", event_id).await.unwrap();
        match status {
            QueueStatus::Waiting { position, eta, .. } => {
                assert_eq!(position, 1);
                assert_eq!(eta, Duration::seconds(1));
            }
            other => panic!("expected Waiting, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rejoin_returns_same_token() {
        let (_, queue) = queue_with_capacity(1);
        let event_id = Uuid::new_v4();

        let first = queue.enqueue("alice", event_id).await.unwrap();
        let again = queue.enqueue("alice", event_id).await.unwrap();
        assert_eq!(first.token().token_id, again.token().token_id);
    }

    #[tokio::test]
    async fn test_status_reports_expiry() {
        let (store, queue) = queue_with_capacity(1);
        let event_id = Uuid::new_v4();
        let token_id = queue
            .enqueue("alice", event_id)
            .await
            .unwrap()
            .token()
            .token_id;

        let err = queue.status(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, BookingError::TokenNotFound(_)));

        store
            .expire_active_tokens(event_id, Utc::now() + Duration::minutes(11))
            .await
            .unwrap();
        let err = queue.status(token_id).await.unwrap_err();
        assert!(matches!(err, BookingError::TokenExpired(_)));
    }

    #[tokio::test]
    async fn test_promotion_cycle_fills_freed_slots() {
        let (store, queue) = queue_with_capacity(1);
        let event_id = Uuid::new_v4();
        let base = Utc::now();

        // Seed the store directly so the waiting order is fixed
        let mut tokens = Vec::new();
        for (i, user) in ["holder", "first", "second"].iter().enumerate() {
            let out = store
                .enqueue_token(EnqueueRequest {
                    token_id: Uuid::new_v4(),
                    user_id: user.to_string(),
                    event_id,
                    now: base + Duration::milliseconds(i as i64),
                    capacity: 1,
                    active_ttl: Duration::minutes(10),
                    waiting_ttl: Duration::hours(1),
                })
                .await
                .unwrap();
            tokens.push(out.token);
        }

        // Capacity is full: nothing moves
        assert_eq!(queue.run_promotion_cycle(base).await.unwrap(), 0);

        // The holder's token lapses, the sweep frees the slot, one promotes
        let later = base + Duration::minutes(11);
        store.expire_active_tokens(event_id, later).await.unwrap();
        assert_eq!(queue.run_promotion_cycle(later).await.unwrap(), 1);

        let promoted = queue.status(tokens[1].token_id).await.unwrap();
        assert!(matches!(promoted, QueueStatus::Active { .. }));

        let still_waiting = queue.status(tokens[2].token_id).await.unwrap();
        match still_waiting {
            QueueStatus::Waiting { position, .. } => assert_eq!(position, 1),
            other => panic!("expected Waiting, got {:?}", other),
        }
    }
}
