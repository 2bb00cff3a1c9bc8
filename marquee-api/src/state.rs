use std::sync::Arc;

use marquee_booking::{BookingRules, PaymentSettlement, Reaper, RetryPolicy, SeatLockManager};
use marquee_core::{SeatEvent, TokenStore};
use marquee_queue::{AdmissionQueue, QueueRules};
use tokio::sync::broadcast;

use crate::metrics::Metrics;

/// Shared application state. Cloned into every handler, so everything in
/// here is a cheap handle.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TokenStore>,
    pub queue: Arc<AdmissionQueue>,
    pub locks: SeatLockManager,
    pub payments: PaymentSettlement,
    pub reaper: Reaper,
    pub seat_tx: broadcast::Sender<SeatEvent>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    /// Wires the services around one store handle. The reaper shares the
    /// queue's waiting TTL so a token and its hold lapse on the same clock.
    pub fn build(
        store: Arc<dyn TokenStore>,
        queue_rules: QueueRules,
        booking_rules: BookingRules,
        retry: RetryPolicy,
        sweep_limit: usize,
    ) -> anyhow::Result<Self> {
        let (seat_tx, _) = broadcast::channel(256);
        let waiting_ttl = queue_rules.waiting_ttl;

        Ok(Self {
            queue: Arc::new(AdmissionQueue::new(store.clone(), queue_rules)),
            locks: SeatLockManager::new(store.clone(), booking_rules),
            payments: PaymentSettlement::new(store.clone(), retry),
            reaper: Reaper::new(store.clone(), waiting_ttl, sweep_limit),
            store,
            seat_tx,
            metrics: Arc::new(Metrics::new()?),
        })
    }
}
