//! Seat holds, hold expiry and idempotent payment settlement.

pub mod locks;
pub mod reaper;
pub mod retry;
pub mod settlement;

pub use locks::{BookingRules, SeatLockManager};
pub use reaper::{Reaper, ReaperReport};
pub use retry::RetryPolicy;
pub use settlement::{PaymentSettlement, SettleResult};
