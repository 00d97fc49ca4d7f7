//! Sinks and file persistence
//!
//! Files written under `output_dir` (prefix = sensor name):
//! - `{sensor}_history.csv` / `{sensor}_history.txt`: one row per closed window
//! - `{sensor}_history.json`: last-known-state backup for warm restarts
//! - `{sensor}_latest.geojson`: points of the current window
//! - `{sensor}_24h.geojson`: points of the history view

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Local, Utc, Weekday};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::core::engine::{EngineEvent, WindowUpdate};
use crate::core::feed::strip_bom;
use crate::error::ExportError;
use crate::types::{
    category_style, ClosedWindow, HistoryView, LastKnownState, RenderedWindow, WindowState,
    HISTORY_STYLE,
};

pub const CSV_HEADER: &str = "ID,DAY,DATE,TIME,TITLE,COUNT,AREAS,CITIES,DESC,ALERTS_IN_SEQUENCE";

const BOM: &str = "\u{feff}";

/// Consumer of engine events. Every hook defaults to a no-op.
#[async_trait]
pub trait WindowSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn window_updated(&self, _update: &WindowUpdate) -> Result<(), ExportError> {
        Ok(())
    }

    async fn window_closed(&self, _closed: &ClosedWindow) -> Result<(), ExportError> {
        Ok(())
    }

    async fn state_saved(&self, _state: &LastKnownState) -> Result<(), ExportError> {
        Ok(())
    }

    async fn history_refreshed(&self, _view: &HistoryView) -> Result<(), ExportError> {
        Ok(())
    }

    async fn terminated(&self, _rendered: &RenderedWindow) -> Result<(), ExportError> {
        Ok(())
    }
}

/// Route one event to the matching hook
pub async fn deliver(sink: &dyn WindowSink, event: &EngineEvent) -> Result<(), ExportError> {
    match event {
        EngineEvent::WindowUpdated(update) => sink.window_updated(update).await,
        EngineEvent::WindowClosed(closed) => sink.window_closed(closed).await,
        EngineEvent::StateSaved(state) => sink.state_saved(state).await,
        EngineEvent::HistoryRefreshed(view) => sink.history_refreshed(view).await,
        EngineEvent::Terminated(rendered) => sink.terminated(rendered).await,
    }
}

// =============================================================================
// FILE EXPORTER
// =============================================================================

#[derive(Debug, Default)]
struct ExporterState {
    disabled: bool,
    /// Digest of the last closed window appended to the logs
    last_logged: Option<String>,
    /// Digest of the last history GeoJSON written
    last_history: Option<String>,
}

#[derive(Debug)]
pub struct FileExporter {
    dir: PathBuf,
    sensor: String,
    state: Mutex<ExporterState>,
}

impl FileExporter {
    pub fn new(dir: impl Into<PathBuf>, sensor: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            sensor: sensor.into(),
            state: Mutex::new(ExporterState::default()),
        }
    }

    pub fn csv_path(&self) -> PathBuf {
        self.path("history.csv")
    }

    pub fn txt_path(&self) -> PathBuf {
        self.path("history.txt")
    }

    pub fn backup_path(&self) -> PathBuf {
        self.path("history.json")
    }

    pub fn latest_geojson_path(&self) -> PathBuf {
        self.path("latest.geojson")
    }

    pub fn history_geojson_path(&self) -> PathBuf {
        self.path("24h.geojson")
    }

    fn path(&self, suffix: &str) -> PathBuf {
        self.dir.join(format!("{}_{}", self.sensor, suffix))
    }

    pub fn is_disabled(&self) -> bool {
        self.lock().disabled
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ExporterState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run a write; a permission failure disables the exporter for good
    fn guarded<F>(&self, write: F) -> Result<(), ExportError>
    where
        F: FnOnce() -> Result<(), ExportError>,
    {
        if self.lock().disabled {
            return Err(ExportError::Disabled);
        }
        let result = write();
        if let Err(e) = &result {
            if e.is_permission() {
                tracing::error!(error = %e, dir = %self.dir.display(), "permission denied, file export disabled");
                self.lock().disabled = true;
            }
        }
        result
    }

    /// Write the CSV header if the file is missing or empty
    pub fn ensure_csv_header(&self) -> Result<(), ExportError> {
        self.guarded(|| {
            let path = self.csv_path();
            let empty = fs::metadata(&path).map(|m| m.len() == 0).unwrap_or(true);
            if empty {
                write_file(&path, &format!("{}{}\n", BOM, CSV_HEADER))?;
                tracing::debug!(path = %path.display(), "csv header written");
            }
            Ok(())
        })
    }

    /// Append a closed window to the CSV and TXT logs, once per window
    pub fn append_closed(&self, closed: &ClosedWindow) -> Result<bool, ExportError> {
        let fingerprint = closed.fingerprint();
        if self.lock().last_logged.as_deref() == Some(fingerprint.as_str()) {
            tracing::debug!(alert_id = %closed.id, "window already logged");
            return Ok(false);
        }
        self.ensure_csv_header()?;

        let at = closed.closed_at.with_timezone(&Local);
        let row = [
            closed.id.clone(),
            hebrew_day(at.weekday()).to_string(),
            at.format("%d/%m/%Y").to_string(),
            at.format("%H:%M:%S").to_string(),
            closed.title.clone(),
            closed.locations.len().to_string(),
            closed.areas.join(", "),
            closed.locations.join(", "),
            closed.description.clone(),
            closed.sequence_count.to_string(),
        ];
        let entry = format!("\n{}\n{}\n", log_timestamp(closed.closed_at), closed.full_message);

        // The TXT entry only follows a CSV row that landed
        self.guarded(|| append_file(&self.csv_path(), &format!("{}\n", csv_row(&row))))?;
        self.lock().last_logged = Some(fingerprint);
        self.guarded(|| append_file(&self.txt_path(), &entry))?;

        tracing::info!(alert_id = %closed.id, path = %self.csv_path().display(), "closed window logged");
        Ok(true)
    }

    pub fn save_state(&self, state: &LastKnownState) -> Result<(), ExportError> {
        self.guarded(|| {
            let json = serde_json::to_string_pretty(state)?;
            write_file(&self.backup_path(), &json)
        })
    }

    /// Read the warm-restart backup. A missing file is not an error.
    pub fn load_state(&self) -> Result<Option<LastKnownState>, ExportError> {
        load_state(&self.backup_path())
    }

    pub fn write_latest_geojson(&self, update: &WindowUpdate) -> Result<(), ExportError> {
        self.guarded(|| {
            let json = serde_json::to_string_pretty(&latest_geojson(update))?;
            write_file(&self.latest_geojson_path(), &json)
        })
    }

    pub fn clear_latest_geojson(&self) -> Result<(), ExportError> {
        self.guarded(|| {
            let json = serde_json::to_string_pretty(&FeatureCollection::new(Vec::new()))?;
            write_file(&self.latest_geojson_path(), &json)
        })
    }

    /// Rewrite the history GeoJSON when its content changed
    pub fn write_history_geojson(&self, view: &HistoryView) -> Result<bool, ExportError> {
        let json = serde_json::to_string_pretty(&history_geojson(view))?;
        let digest = hex_digest(json.as_bytes());
        if self.lock().last_history.as_deref() == Some(digest.as_str()) {
            return Ok(false);
        }
        self.guarded(|| write_file(&self.history_geojson_path(), &json))?;
        self.lock().last_history = Some(digest);
        Ok(true)
    }
}

#[async_trait]
impl WindowSink for FileExporter {
    fn name(&self) -> &'static str {
        "files"
    }

    async fn window_updated(&self, update: &WindowUpdate) -> Result<(), ExportError> {
        self.write_latest_geojson(update)?;
        self.write_history_geojson(&update.history)?;
        Ok(())
    }

    async fn window_closed(&self, closed: &ClosedWindow) -> Result<(), ExportError> {
        if closed.is_test {
            tracing::debug!(alert_id = %closed.id, "test window not logged");
            return Ok(());
        }
        self.append_closed(closed)?;
        Ok(())
    }

    async fn state_saved(&self, state: &LastKnownState) -> Result<(), ExportError> {
        self.save_state(state)
    }

    async fn history_refreshed(&self, view: &HistoryView) -> Result<(), ExportError> {
        self.write_history_geojson(view)?;
        Ok(())
    }

    /// No window outlives the process: clear the latest map
    async fn terminated(&self, _rendered: &RenderedWindow) -> Result<(), ExportError> {
        self.clear_latest_geojson()
    }
}

pub fn load_state(path: &Path) -> Result<Option<LastKnownState>, ExportError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(ExportError::io(path.display().to_string(), e)),
    };
    let state = serde_json::from_str(strip_bom(&text))?;
    Ok(Some(state))
}

fn write_file(path: &Path, content: &str) -> Result<(), ExportError> {
    let display = path.display().to_string();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| ExportError::io(&display, e))?;
    }
    fs::write(path, content).map_err(|e| ExportError::io(display, e))
}

fn append_file(path: &Path, content: &str) -> Result<(), ExportError> {
    let display = path.display().to_string();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| ExportError::io(&display, e))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| ExportError::io(&display, e))?;
    file.write_all(content.as_bytes())
        .map_err(|e| ExportError::io(display, e))
}

fn hex_digest(bytes: &[u8]) -> String {
    Sha256::digest(bytes).iter().map(|b| format!("{:02x}", b)).collect()
}

/// Quote only fields that need it
pub fn csv_row(fields: &[String]) -> String {
    fields
        .iter()
        .map(|f| {
            if f.contains([',', '"', '\n', '\r']) {
                format!("\"{}\"", f.replace('"', "\"\""))
            } else {
                f.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

pub fn hebrew_day(day: Weekday) -> &'static str {
    match day {
        Weekday::Sun => "ראשון",
        Weekday::Mon => "שני",
        Weekday::Tue => "שלישי",
        Weekday::Wed => "רביעי",
        Weekday::Thu => "חמישי",
        Weekday::Fri => "שישי",
        Weekday::Sat => "שבת",
    }
}

// =============================================================================
// GEOJSON
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct FeatureCollection {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub features: Vec<Feature>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Feature {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub geometry: Point,
    pub properties: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct Point {
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// [lon, lat]
    pub coordinates: [f64; 2],
}

impl FeatureCollection {
    fn new(features: Vec<Feature>) -> Self {
        Self {
            kind: "FeatureCollection",
            features,
        }
    }
}

impl Feature {
    fn point(lat: f64, lon: f64, properties: serde_json::Value) -> Self {
        Self {
            kind: "Feature",
            geometry: Point {
                kind: "Point",
                coordinates: [lon, lat],
            },
            properties,
        }
    }
}

fn coordinate_key(lat: f64, lon: f64) -> String {
    format!("{},{}", lat, lon)
}

/// One point per coordinate in the current window; empty when idle
pub fn latest_geojson(update: &WindowUpdate) -> FeatureCollection {
    let rendered = &update.rendered;
    if rendered.state == WindowState::Idle {
        return FeatureCollection::new(Vec::new());
    }

    let mut points: BTreeMap<String, (f64, f64, BTreeSet<&str>)> = BTreeMap::new();
    for loc in &update.locations {
        let Some(c) = loc.coordinates else {
            continue;
        };
        points
            .entry(coordinate_key(c.lat, c.lon))
            .or_insert_with(|| (c.lat, c.lon, BTreeSet::new()))
            .2
            .insert(loc.display_name.as_str());
    }

    let style = category_style(rendered.category);
    let timestamp = rendered.last_changed.to_rfc3339();
    let features = points
        .into_values()
        .map(|(lat, lon, names)| {
            Feature::point(
                lat,
                lon,
                serde_json::json!({
                    "name": names.into_iter().collect::<Vec<_>>().join(", "),
                    "icon": style.icon,
                    "label": style.emoji,
                    "description": format!("{}\n{}\n({})", rendered.title, rendered.description, timestamp),
                    "alert_type": rendered.title,
                    "timestamp": timestamp,
                    "category": rendered.category,
                }),
            )
        })
        .collect();
    FeatureCollection::new(features)
}

/// One point per coordinate in the history view, with its latest alert and count
pub fn history_geojson(view: &HistoryView) -> FeatureCollection {
    struct Acc<'a> {
        lat: f64,
        lon: f64,
        names: BTreeSet<&'a str>,
        latest: &'a crate::types::HistoryItem,
        count: usize,
    }

    let mut points: BTreeMap<String, Acc<'_>> = BTreeMap::new();
    for item in &view.items {
        let Some(c) = item.coordinates else {
            continue;
        };
        let acc = points.entry(coordinate_key(c.lat, c.lon)).or_insert_with(|| Acc {
            lat: c.lat,
            lon: c.lon,
            names: BTreeSet::new(),
            latest: item,
            count: 0,
        });
        acc.names.insert(item.location.as_str());
        acc.count += 1;
        if item.observed_at > acc.latest.observed_at {
            acc.latest = item;
        }
    }

    let features = points
        .into_values()
        .map(|acc| {
            let names = acc.names.into_iter().collect::<Vec<_>>().join(", ");
            Feature::point(
                acc.lat,
                acc.lon,
                serde_json::json!({
                    "name": names,
                    "area": acc.latest.area,
                    "icon": HISTORY_STYLE.icon,
                    "label": HISTORY_STYLE.emoji,
                    "description": format!(
                        "{}\n{}\nזמן אחרון: {}\nסה״כ: {} אירועים",
                        acc.latest.title, names, acc.latest.time, acc.count
                    ),
                    "alert_count_at_location": acc.count,
                    "latest_alert_time": acc.latest.time,
                }),
            )
        })
        .collect();
    FeatureCollection::new(features)
}

/// Local wall-clock rendering used by the text log
pub fn log_timestamp(at: DateTime<Utc>) -> String {
    let local = at.with_timezone(&Local);
    format!(
        "{}, {}, {}",
        hebrew_day(local.weekday()),
        local.format("%d/%m/%Y"),
        local.format("%H:%M:%S")
    )
}

// =============================================================================
// TESTS
// =============================================================================
