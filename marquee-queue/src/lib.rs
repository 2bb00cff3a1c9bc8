//! Waiting-room admission control for high-demand on-sales.

pub mod admission;

pub use admission::{AdmissionQueue, QueueRules, QueueStatus};
