pub mod error;
pub mod events;
pub mod memory;
pub mod models;
pub mod store;

pub use error::BookingError;
pub use events::{SeatEvent, SeatEventKind};
pub use memory::MemoryStore;
pub use models::{
    Balance, EventRecord, QueueToken, Receipt, Reservation, ReservationStatus, Seat, SeatStatus,
    TokenStatus,
};
pub use store::{
    EnqueueOutcome, EnqueueRequest, HoldRequest, ReleaseOutcome, SettleOutcome, SettleRequest,
    TokenStore,
};
