//! Snapshot cache and live subscription fan-out.
//!
//! The cache holds the current dashboard view behind an atomic pointer; the
//! hub publishes new versions into it and pushes each one to subscribers as
//! a delta or, when they are too far behind, a full snapshot.

pub mod cache;
pub mod error;
pub mod hub;
pub mod message;
mod outbox;

pub use cache::{SnapshotCache, VersionedSnapshot};
pub use error::LiveError;
pub use hub::{HubSettings, Subscription, SubscriptionHub};
pub use message::LiveMessage;
