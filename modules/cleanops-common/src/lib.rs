pub mod config;
pub mod error;
pub mod file_config;
pub mod lifecycle;
pub mod snapshot;
pub mod types;

pub use config::Config;
pub use error::{CleanOpsError, IngestError};
pub use file_config::{AlertRules, FileConfig, ScheduleConfig};
pub use lifecycle::RunLifecycle;
pub use snapshot::*;
pub use types::*;
