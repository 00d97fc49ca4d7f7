//! Rendered projections of the alert window

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::WindowState;

/// Everything the presentation layer needs to show one window state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedWindow {
    pub state: WindowState,
    pub id: String,
    pub category: u8,
    pub title: String,
    pub description: String,
    pub icon: String,
    pub emoji: String,
    /// Sorted, unique
    pub areas: Vec<String>,
    /// Sorted, unique display names
    pub locations: Vec<String>,
    pub areas_summary: String,
    pub locations_summary: String,
    /// Compact line bounded by the status length limit
    pub status_line: String,
    /// Title followed by one "area: locations" bullet per area
    pub full_message: String,
    /// The same bullets joined on one line
    pub alert_text: String,
    /// `*bold*` / `_italic_` grouped message
    pub whatsapp_message: String,
    /// `**bold**` / `__italic__` grouped message
    pub telegram_message: String,
    /// Shelter duration parsed from the description
    pub duration_secs: u64,
    pub sequence_count: u32,
    pub location_count: usize,
    /// Pre-alert or update notice rather than a live alert
    pub special_update: bool,
    pub is_test: bool,
    pub last_changed: DateTime<Utc>,
    pub previous: Option<PreviousWindow>,
}

/// The final projection of the last closed window, kept as a baseline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviousWindow {
    pub id: String,
    pub category: u8,
    pub title: String,
    pub description: String,
    pub areas_summary: String,
    pub locations_summary: String,
    pub status_line: String,
    pub full_message: String,
    pub sequence_count: u32,
    pub location_count: usize,
    pub last_changed: DateTime<Utc>,
}

impl From<&RenderedWindow> for PreviousWindow {
    fn from(r: &RenderedWindow) -> Self {
        Self {
            id: r.id.clone(),
            category: r.category,
            title: r.title.clone(),
            description: r.description.clone(),
            areas_summary: r.areas_summary.clone(),
            locations_summary: r.locations_summary.clone(),
            status_line: r.status_line.clone(),
            full_message: r.full_message.clone(),
            sequence_count: r.sequence_count,
            location_count: r.location_count,
            last_changed: r.last_changed,
        }
    }
}

/// Finalized record of a window, emitted once on close
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedWindow {
    pub id: String,
    pub category: u8,
    pub title: String,
    pub description: String,
    pub areas: Vec<String>,
    pub locations: Vec<String>,
    pub full_message: String,
    pub sequence_count: u32,
    pub started_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    pub is_test: bool,
}

impl ClosedWindow {
    /// Content fingerprint; independent of the close time
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.id.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.title.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.started_at.timestamp_millis().to_le_bytes());
        for loc in &self.locations {
            hasher.update([0u8]);
            hasher.update(loc.as_bytes());
        }
        hasher.update(self.sequence_count.to_le_bytes());
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

/// Warm-restart snapshot of the most recent alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastKnownState {
    pub id: String,
    #[serde(rename = "cat")]
    pub category: u8,
    pub title: String,
    #[serde(rename = "data")]
    pub locations: Vec<String>,
    #[serde(rename = "desc")]
    pub description: String,
    #[serde(rename = "alertDate")]
    pub alert_date: DateTime<Utc>,
    pub last_changed: DateTime<Utc>,
    pub alerts_count: u32,
}
