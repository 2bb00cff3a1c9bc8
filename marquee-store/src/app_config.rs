use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub redis: RedisConfig,
    pub queue: QueueSettings,
    pub booking: BookingSettings,
    pub retry: RetrySettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
    pub op_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueueSettings {
    /// Max concurrently ACTIVE tokens per event
    pub capacity: u32,
    pub promotion_interval_secs: u64,
    pub active_ttl_secs: u64,
    pub waiting_ttl_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BookingSettings {
    pub hold_ttl_secs: u64,
    pub reaper_interval_secs: u64,
    /// Max lapsed holds released per sweep pass
    pub sweep_limit: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .set_default("server.port", 8080)?
            .set_default("redis.url", "redis://127.0.0.1:6379")?
            .set_default("redis.op_timeout_ms", 2_000)?
            .set_default("queue.capacity", 100)?
            .set_default("queue.promotion_interval_secs", 1)?
            .set_default("queue.active_ttl_secs", 600)?
            .set_default("queue.waiting_ttl_secs", 3_600)?
            .set_default("booking.hold_ttl_secs", 300)?
            .set_default("booking.reaper_interval_secs", 30)?
            .set_default("booking.sweep_limit", 512)?
            .set_default("retry.max_attempts", 3)?
            .set_default("retry.base_backoff_ms", 50)?
            // Optional config files layered over the defaults
            .add_source(config::File::with_name("config/default").required(false))
            // Environment-specific file, selected by RUN_MODE
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Local overrides, not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // Eg. MARQUEE__QUEUE__CAPACITY=50 overrides queue.capacity
            .add_source(config::Environment::with_prefix("MARQUEE").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_load_without_files() {
        let config = Config::load().unwrap();
        assert_eq!(config.queue.capacity, 100);
        assert_eq!(config.queue.active_ttl_secs, 600);
        assert_eq!(config.booking.hold_ttl_secs, 300);
        assert_eq!(config.booking.reaper_interval_secs, 30);
        assert_eq!(config.retry.max_attempts, 3);
    }
}
