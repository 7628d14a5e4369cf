//! Aggregation engine.
//!
//! Folds the event store into rolling dashboard statistics and drives the
//! single fold loop that publishes each resulting delta to the live layer.

pub mod aggregator;
pub mod alerts;
pub mod runtime;
pub mod schedules;
pub mod window;

pub use aggregator::{Aggregator, AggregatorSettings};
pub use alerts::AlertBook;
pub use runtime::{EngineCommand, EngineHandle, FoldRuntime};
pub use schedules::ScheduleBook;
pub use window::{Outcome, RollingWindow, WindowPoint, WindowTotals};
