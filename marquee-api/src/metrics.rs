use prometheus::{Encoder, IntCounter, Registry, TextEncoder};

/// Counters for the admission and booking pipeline. Each instance owns its
/// registry so tests can assert on a fresh one.
pub struct Metrics {
    registry: Registry,
    pub queue_joins: IntCounter,
    pub tokens_promoted: IntCounter,
    pub tokens_expired: IntCounter,
    pub holds_acquired: IntCounter,
    pub holds_rejected: IntCounter,
    pub holds_reaped: IntCounter,
    pub payments_settled: IntCounter,
    pub payments_rejected: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let queue_joins = IntCounter::new(
            "marquee_queue_joins_total",
            "Accepted waiting-room join requests",
        )?;
        let tokens_promoted = IntCounter::new(
            "marquee_tokens_promoted_total",
            "Waiting tokens promoted to ACTIVE",
        )?;
        let tokens_expired = IntCounter::new(
            "marquee_tokens_expired_total",
            "Queue tokens expired by the background sweep",
        )?;
        let holds_acquired = IntCounter::new(
            "marquee_holds_acquired_total",
            "Seat holds successfully acquired",
        )?;
        let holds_rejected = IntCounter::new(
            "marquee_holds_rejected_total",
            "Seat hold attempts rejected because the seat was taken",
        )?;
        let holds_reaped = IntCounter::new(
            "marquee_holds_reaped_total",
            "Lapsed holds released by the background sweep",
        )?;
        let payments_settled = IntCounter::new(
            "marquee_payments_settled_total",
            "Payments settled, excluding duplicate replays",
        )?;
        let payments_rejected = IntCounter::new(
            "marquee_payments_rejected_total",
            "Payments rejected for insufficient balance",
        )?;

        registry.register(Box::new(queue_joins.clone()))?;
        registry.register(Box::new(tokens_promoted.clone()))?;
        registry.register(Box::new(tokens_expired.clone()))?;
        registry.register(Box::new(holds_acquired.clone()))?;
        registry.register(Box::new(holds_rejected.clone()))?;
        registry.register(Box::new(holds_reaped.clone()))?;
        registry.register(Box::new(payments_settled.clone()))?;
        registry.register(Box::new(payments_rejected.clone()))?;

        Ok(Self {
            registry,
            queue_joins,
            tokens_promoted,
            tokens_expired,
            holds_acquired,
            holds_rejected,
            holds_reaped,
            payments_settled,
            payments_rejected,
        })
    }

    pub fn export(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_includes_registered_counters() {
        let metrics = Metrics::new().unwrap();
        metrics.queue_joins.inc();
        metrics.payments_settled.inc();

        let text = metrics.export().unwrap();
        assert!(text.contains("marquee_queue_joins_total 1"));
        assert!(text.contains("marquee_payments_settled_total 1"));
        assert!(text.contains("marquee_holds_acquired_total 0"));
    }
}
