//! Feed payloads as the engine sees them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One poll's alert payload. Immutable once received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSnapshot {
    /// Opaque upstream id; repeats while the situation is unchanged
    pub id: String,
    pub category: u8,
    pub title: String,
    pub description: String,
    /// Raw location names, may contain duplicates and drill markers
    pub locations: Vec<String>,
}

impl RawSnapshot {
    pub fn new(
        id: impl Into<String>,
        category: u8,
        title: impl Into<String>,
        description: impl Into<String>,
        locations: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            category,
            title: title.into(),
            description: description.into(),
            locations,
        }
    }
}

/// Result of one live-feed poll
#[derive(Debug, Clone, PartialEq)]
pub enum FeedPoll {
    /// Payload with a non-empty location list
    Active(RawSnapshot),
    /// Upstream explicitly reported no active alert
    Idle,
    /// Transport error or malformed body; says nothing about the situation
    Unavailable,
}

impl FeedPoll {
    /// Only an explicit "no data" response confirms idleness
    pub fn confirms_idle(&self) -> bool {
        matches!(self, FeedPoll::Idle)
    }
}

/// One row of the upstream history feed, used to seed the history store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub title: String,
    pub location: String,
    pub observed_at: DateTime<Utc>,
}
