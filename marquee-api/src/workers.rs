use std::time::Duration;

use chrono::Utc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::warn;

use marquee_core::{SeatEvent, SeatEventKind};

use crate::state::AppState;

/// Spawns the promotion and reaper loops. Both run until the process
/// exits; a failed pass is logged and retried on the next tick.
pub fn spawn_background_workers(
    state: &AppState,
    promotion_period: Duration,
    reaper_period: Duration,
) {
    let promo_state = state.clone();
    tokio::spawn(async move {
        let mut ticker = interval(promotion_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match promo_state.queue.run_promotion_cycle(Utc::now()).await {
                Ok(promoted) if promoted > 0 => {
                    promo_state.metrics.tokens_promoted.inc_by(promoted);
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "promotion cycle failed"),
            }
        }
    });

    let reap_state = state.clone();
    tokio::spawn(async move {
        let mut ticker = interval(reaper_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match reap_state.reaper.run_reaper_sweep(Utc::now()).await {
                Ok(report) => {
                    if !report.released_holds.is_empty() {
                        reap_state
                            .metrics
                            .holds_reaped
                            .inc_by(report.released_holds.len() as u64);
                        for reservation in &report.released_holds {
                            let _ = reap_state.seat_tx.send(SeatEvent::new(
                                reservation.event_id,
                                reservation.seat_number,
                                SeatEventKind::Released,
                                reservation.reservation_id,
                            ));
                        }
                    }
                    let expired = report.expired_active + report.expired_waiting;
                    if expired > 0 {
                        reap_state.metrics.tokens_expired.inc_by(expired);
                    }
                }
                Err(e) => warn!(error = %e, "reaper sweep failed"),
            }
        }
    });
}
