//! Append-only run event store.
//!
//! Validates every event against its run's lifecycle before assigning a
//! sequence number, optionally journals to SQLite, and replays the journal on
//! open. The sequence number is the aggregation watermark downstream.

mod journal;
pub mod store;
pub mod types;

pub use store::{EventCursor, EventStore};
pub use types::{StoreError, StoredEvent};
