//! History store
//!
//! Append-only log of observations in arrival order. Every query runs the
//! same two passes over it:
//! 1. retention: drop entries older than `now - horizon`
//! 2. merge: newest-first per location, drop an entry that lies within
//!    `merge_window` of the last entry kept for that location
//!
//! and then groups what is left by title and area.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Duration, Local, Utc};

use crate::core::canonical::canonicalize;
use crate::core::gazetteer::{resolve_or_unknown, LocationResolver};
use crate::types::{
    CanonicalLocation, GroupedHistory, GroupedLocation, HistoryEntry, HistoryItem, HistoryRecord,
    HistoryView,
};
use crate::{PRE_ALERT_ALIAS, PRE_ALERT_TITLE};

#[derive(Debug, Clone, Default)]
pub struct HistoryStore {
    entries: Vec<HistoryEntry>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one observation. No pruning happens here.
    pub fn append(&mut self, title: &str, location: &CanonicalLocation, observed_at: DateTime<Utc>) {
        self.entries.push(HistoryEntry {
            title: title.to_string(),
            location: location.display_name.clone(),
            area: location.area.clone(),
            observed_at,
            coordinates: location.coordinates,
        });
    }

    /// Load upstream history, keeping only records inside the horizon.
    /// Returns the number of entries added.
    pub fn seed(
        &mut self,
        records: &[HistoryRecord],
        resolver: &dyn LocationResolver,
        now: DateTime<Utc>,
        horizon: Duration,
    ) -> usize {
        let cutoff = cutoff(now, horizon);
        let mut fresh: Vec<&HistoryRecord> =
            records.iter().filter(|r| r.observed_at >= cutoff).collect();
        fresh.sort_by_key(|r| r.observed_at);

        let mut added = 0;
        for record in fresh {
            let key = canonicalize(&record.location);
            if key.is_empty() {
                continue;
            }
            let loc = resolve_or_unknown(resolver, &key, &record.location);
            self.append(&record.title, &loc, record.observed_at);
            added += 1;
        }
        let locations: BTreeSet<&str> = self.entries.iter().map(|e| e.location.as_str()).collect();
        tracing::info!(
            received = records.len(),
            kept = added,
            locations = locations.len(),
            "history seeded"
        );
        added
    }

    /// Retention, then per-location merge, then grouping
    pub fn query(&self, horizon: Duration, merge_window: Duration, now: DateTime<Utc>) -> HistoryView {
        let cutoff = cutoff(now, horizon);

        // Newest first; among equal timestamps the later arrival comes first
        let mut retained: Vec<&HistoryEntry> = self
            .entries
            .iter()
            .rev()
            .filter(|e| e.observed_at >= cutoff)
            .collect();
        retained.sort_by(|a, b| b.observed_at.cmp(&a.observed_at));

        let mut last_kept: HashMap<&str, DateTime<Utc>> = HashMap::new();
        let mut kept: Vec<&HistoryEntry> = Vec::with_capacity(retained.len());
        for entry in retained {
            if let Some(last) = last_kept.get(entry.location.as_str()) {
                if *last - entry.observed_at < merge_window {
                    continue;
                }
            }
            last_kept.insert(entry.location.as_str(), entry.observed_at);
            kept.push(entry);
        }

        let items: Vec<HistoryItem> = kept
            .iter()
            .map(|e| HistoryItem {
                title: e.title.clone(),
                location: e.location.clone(),
                area: e.area.clone(),
                time: e.observed_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string(),
                observed_at: e.observed_at,
                coordinates: e.coordinates,
            })
            .collect();

        let locations: Vec<String> = items
            .iter()
            .map(|i| i.location.as_str())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(str::to_string)
            .collect();

        HistoryView {
            horizon_hours: u64::try_from(horizon.num_hours()).unwrap_or(0),
            grouped: group(&items),
            items,
            locations,
        }
    }

    /// Physically drop entries older than the horizon. Returns how many went.
    pub fn prune(&mut self, now: DateTime<Utc>, horizon: Duration) -> usize {
        let cutoff = cutoff(now, horizon);
        let before = self.entries.len();
        self.entries.retain(|e| e.observed_at >= cutoff);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }
}

/// Oldest retained instant; a horizon reaching past the calendar keeps everything
fn cutoff(now: DateTime<Utc>, horizon: Duration) -> DateTime<Utc> {
    now.checked_sub_signed(horizon).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn group(items: &[HistoryItem]) -> GroupedHistory {
    let mut grouped = GroupedHistory::new();
    for item in items {
        let title = if item.title == PRE_ALERT_TITLE {
            PRE_ALERT_ALIAS
        } else {
            item.title.as_str()
        };
        let time = item
            .observed_at
            .with_timezone(&Local)
            .format("%H:%M:%S")
            .to_string();
        grouped
            .entry(title.to_string())
            .or_default()
            .entry(item.area.clone())
            .or_default()
            .push(GroupedLocation {
                name: item.location.clone(),
                time,
            });
    }
    for areas in grouped.values_mut() {
        for locations in areas.values_mut() {
            locations.sort_by(|a, b| a.name.cmp(&b.name));
        }
    }
    grouped
}

// =============================================================================
// TESTS
// =============================================================================
