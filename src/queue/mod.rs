//! Durable outbox for SOS alerts raised while the backend is unreachable.
//!
//! Alerts are kept in local storage, replayed oldest first once the
//! connectivity signal reports online, and dropped after a fixed number of
//! failed attempts or once they age past the sweep horizon.

mod outbox;
mod storage;
mod types;

pub use outbox::OfflineQueue;
pub use storage::SqliteQueueStorage;
pub use types::{AlertPayload, ReplayReport, SkipReason, Submitted};
