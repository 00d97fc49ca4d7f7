//! Alert window state and accumulation

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{CanonicalLocation, RawSnapshot};

/// The two states of the window machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowState {
    #[default]
    Idle,
    Active,
}

impl WindowState {
    pub fn is_active(&self) -> bool {
        matches!(self, WindowState::Active)
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            WindowState::Idle => "🟢",
            WindowState::Active => "🚨",
        }
    }
}

impl std::fmt::Display for WindowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            WindowState::Idle => "IDLE",
            WindowState::Active => "ACTIVE",
        };
        write!(f, "{}", name)
    }
}

/// Identity of a folded snapshot's content. Equal keys mean a redelivery.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub id: String,
    pub category: u8,
    pub title: String,
    pub description: String,
    pub locations: BTreeSet<String>,
}

impl DedupKey {
    pub fn new<'a>(snapshot: &RawSnapshot, keys: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            id: snapshot.id.clone(),
            category: snapshot.category,
            title: snapshot.title.clone(),
            description: snapshot.description.clone(),
            locations: keys.into_iter().map(str::to_string).collect(),
        }
    }
}

/// title → area → display names
pub type GroupedLocations = BTreeMap<String, BTreeMap<String, BTreeSet<String>>>;

/// The single mutable aggregate for the current spell of activity
#[derive(Debug, Clone, Default, Serialize)]
pub struct AlertWindow {
    /// Distinct non-duplicate snapshots folded in
    pub sequence_count: u32,
    /// Accumulated locations by canonical key; only grows within a window
    pub locations: BTreeMap<String, CanonicalLocation>,
    pub grouped: GroupedLocations,
    pub latest: Option<RawSnapshot>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_activity: Option<DateTime<Utc>>,
    /// Set once the dedup key has been reset for this window
    pub sentinel_cleared: bool,
    pub is_test: bool,
}

impl AlertWindow {
    pub fn accumulated_keys(&self) -> BTreeSet<String> {
        self.locations.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }
}
