use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use marquee_api::{app, spawn_background_workers, AppState};
use marquee_booking::{BookingRules, RetryPolicy};
use marquee_core::TokenStore;
use marquee_queue::QueueRules;
use marquee_store::{Config, RedisStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "marquee_api=debug,tower_http=debug,axum::rejection=trace".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;

    let store: Arc<dyn TokenStore> = Arc::new(
        RedisStore::connect(
            &config.redis.url,
            StdDuration::from_millis(config.redis.op_timeout_ms),
        )
        .await?,
    );
    tracing::info!(url = %config.redis.url, "connected to redis");

    let queue_rules = QueueRules {
        capacity: config.queue.capacity,
        promotion_interval: Duration::seconds(config.queue.promotion_interval_secs as i64),
        active_ttl: Duration::seconds(config.queue.active_ttl_secs as i64),
        waiting_ttl: Duration::seconds(config.queue.waiting_ttl_secs as i64),
    };
    let booking_rules = BookingRules {
        hold_ttl: Duration::seconds(config.booking.hold_ttl_secs as i64),
    };
    let retry = RetryPolicy {
        max_attempts: config.retry.max_attempts,
        base_backoff: StdDuration::from_millis(config.retry.base_backoff_ms),
    };

    let promotion_period = StdDuration::from_secs(config.queue.promotion_interval_secs.max(1));
    let reaper_period = StdDuration::from_secs(config.booking.reaper_interval_secs.max(1));

    let state = AppState::build(
        store,
        queue_rules,
        booking_rules,
        retry,
        config.booking.sweep_limit,
    )?;
    spawn_background_workers(&state, promotion_period, reaper_period);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app(state)).await?;

    Ok(())
}
