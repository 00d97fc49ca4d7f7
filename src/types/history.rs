//! History entries and views

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Coordinates;

/// One (title, location, area, time) observation. Never rewritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub title: String,
    pub location: String,
    pub area: String,
    pub observed_at: DateTime<Utc>,
    pub coordinates: Option<Coordinates>,
}

/// A retained entry as reported in a view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub title: String,
    pub location: String,
    pub area: String,
    /// Local wall-clock time, `YYYY-MM-DD HH:MM:SS`
    pub time: String,
    pub observed_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupedLocation {
    pub name: String,
    /// `HH:MM:SS`
    pub time: String,
}

/// title → area → locations (alphabetical)
pub type GroupedHistory = BTreeMap<String, BTreeMap<String, Vec<GroupedLocation>>>;

/// Result of a history query: retention then per-location merge, then grouping
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryView {
    pub horizon_hours: u64,
    /// Newest first
    pub items: Vec<HistoryItem>,
    /// Unique location names, sorted
    pub locations: Vec<String>,
    pub grouped: GroupedHistory,
}

impl HistoryView {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
