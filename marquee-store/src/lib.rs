//! Redis-backed persistence for the booking engine, plus the layered
//! runtime configuration it is wired from.

pub mod app_config;
pub mod redis_store;

pub use app_config::Config;
pub use redis_store::RedisStore;
