use cleanops_common::CleanOpsError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LiveError {
    /// Unacknowledged for too long. The client must reconnect and start from
    /// a full snapshot.
    #[error("subscriber {subscriber_id} evicted; reconnect for a full snapshot")]
    SubscriberEvicted { subscriber_id: String },
}

impl From<LiveError> for CleanOpsError {
    fn from(err: LiveError) -> Self {
        match err {
            LiveError::SubscriberEvicted { subscriber_id } => {
                CleanOpsError::SubscriberEvicted { subscriber_id }
            }
        }
    }
}
