use std::sync::Arc;

use cleanops_common::SnapshotDelta;
use serde::Serialize;

use crate::cache::VersionedSnapshot;

/// What a subscriber receives, in version order.
///
/// Serialized as `{"type": "full", "version", "snapshot"}` or
/// `{"type": "delta", "version", "delta"}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LiveMessage {
    Full {
        #[serde(flatten)]
        view: Arc<VersionedSnapshot>,
    },
    /// Moves a subscriber holding `version - 1` to `version`.
    Delta {
        version: u64,
        delta: Arc<SnapshotDelta>,
    },
}

impl LiveMessage {
    pub fn full(view: Arc<VersionedSnapshot>) -> Self {
        Self::Full { view }
    }

    pub fn version(&self) -> u64 {
        match self {
            Self::Full { view } => view.version,
            Self::Delta { version, .. } => *version,
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use cleanops_common::DashboardSnapshot;

    #[test]
    fn full_message_flattens_version_and_snapshot() {
        let msg = LiveMessage::full(Arc::new(VersionedSnapshot {
            version: 4,
            snapshot: DashboardSnapshot::default(),
        }));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "full");
        assert_eq!(json["version"], 4);
        assert!(json["snapshot"]["summary"].is_object());
        assert!(json["snapshot"]["recent_runs"].is_array());
    }

    #[test]
    fn delta_message_carries_tag_and_version() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let msg = LiveMessage::Delta {
            version: 9,
            delta: Arc::new(SnapshotDelta::new(12, at)),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "delta");
        assert_eq!(json["version"], 9);
        assert_eq!(json["delta"]["watermark"], 12);
    }
}
