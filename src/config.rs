//! Typed configuration
//!
//! Loaded from an optional YAML file overlaid with `REDALERT__*` environment
//! variables, then clamped by [`AppConfig::validated`]. Out-of-range values
//! fall back to their defaults with a warning instead of failing startup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ConfigError;
use crate::{
    DEFAULT_ATTR_MAX_LEN, DEFAULT_HISTORY_HOURS, DEFAULT_IDLE_TIMEOUT_SECS,
    DEFAULT_MERGE_WINDOW_MINUTES, DEFAULT_MESSAGE_MAX_LEN, DEFAULT_POLL_INTERVAL_SECS,
    DEFAULT_SENSOR_NAME, DEFAULT_STATUS_MAX_LEN, DEFAULT_TEST_DURATION_SECS,
    FALLBACK_HISTORY_HOURS, MAX_HISTORY_HOURS, MAX_MERGE_WINDOW_MINUTES, MAX_POLL_INTERVAL_SECS,
    MAX_WINDOW_DURATION_SECS,
};

pub const DEFAULT_CONFIG_PATH: &str = "config/redalert.yaml";
pub const ENV_PREFIX: &str = "REDALERT";

pub const LIVE_FEED_URL: &str = "https://www.oref.org.il/WarningMessages/alert/alerts.json";
pub const HISTORY_FEED_URL: &str =
    "https://www.oref.org.il/WarningMessages/alert/History/AlertsHistory.json";
pub const GAZETTEER_URL: &str =
    "https://raw.githubusercontent.com/idodov/RedAlert/main/apps/red_alerts_israel/lamas_data.json";

/// Upstream feed endpoints and client budget
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub live_url: String,
    pub history_url: String,
    pub gazetteer_url: String,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Extra attempts after the first failed request
    pub retries: u32,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            live_url: LIVE_FEED_URL.to_string(),
            history_url: HISTORY_FEED_URL.to_string(),
            gazetteer_url: GAZETTEER_URL.to_string(),
            request_timeout_secs: 15,
            connect_timeout_secs: 5,
            retries: 2,
        }
    }
}

/// HTTP API server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,
    pub addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: "127.0.0.1:8088".to_string(),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub poll_interval_secs: u64,
    pub idle_timeout_secs: u64,
    pub test_duration_secs: u64,
    pub history_hours: u64,
    pub merge_window_minutes: u64,
    pub status_max_len: usize,
    pub attr_max_len: usize,
    pub message_max_len: usize,
    /// Locations the operator cares about; a list or one comma-separated string
    #[serde(deserialize_with = "deserialize_locations")]
    pub watched_locations: Vec<String>,
    pub sensor_name: String,
    pub save_files: bool,
    pub output_dir: PathBuf,
    pub gazetteer_path: PathBuf,
    pub feed: FeedConfig,
    pub server: ServerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
            test_duration_secs: DEFAULT_TEST_DURATION_SECS,
            history_hours: DEFAULT_HISTORY_HOURS,
            merge_window_minutes: DEFAULT_MERGE_WINDOW_MINUTES,
            status_max_len: DEFAULT_STATUS_MAX_LEN,
            attr_max_len: DEFAULT_ATTR_MAX_LEN,
            message_max_len: DEFAULT_MESSAGE_MAX_LEN,
            watched_locations: Vec::new(),
            sensor_name: DEFAULT_SENSOR_NAME.to_string(),
            save_files: true,
            output_dir: PathBuf::from("www"),
            gazetteer_path: PathBuf::from("data/lamas_data.json"),
            feed: FeedConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LocationList {
    List(Vec<String>),
    Joined(String),
}

fn deserialize_locations<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = match LocationList::deserialize(deserializer)? {
        LocationList::List(items) => items,
        LocationList::Joined(s) => s.split(',').map(str::to_string).collect(),
    };
    Ok(raw)
}

impl AppConfig {
    /// Load from `path` (or the default location) plus environment overrides.
    /// A missing file is not an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));
        let settings = Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let cfg: AppConfig = settings.try_deserialize()?;
        Ok(cfg.validated())
    }

    /// Clamp out-of-range values back to defaults, warning for each
    pub fn validated(mut self) -> Self {
        if self.poll_interval_secs <= 1 || self.poll_interval_secs > MAX_POLL_INTERVAL_SECS {
            tracing::warn!(value = self.poll_interval_secs, max = MAX_POLL_INTERVAL_SECS, "poll_interval_secs out of range, using default");
            self.poll_interval_secs = DEFAULT_POLL_INTERVAL_SECS;
        }
        if self.idle_timeout_secs == 0 || self.idle_timeout_secs > MAX_WINDOW_DURATION_SECS {
            tracing::warn!(value = self.idle_timeout_secs, max = MAX_WINDOW_DURATION_SECS, "idle_timeout_secs out of range, using default");
            self.idle_timeout_secs = DEFAULT_IDLE_TIMEOUT_SECS;
        }
        if self.test_duration_secs == 0 || self.test_duration_secs > MAX_WINDOW_DURATION_SECS {
            tracing::warn!(value = self.test_duration_secs, max = MAX_WINDOW_DURATION_SECS, "test_duration_secs out of range, using default");
            self.test_duration_secs = DEFAULT_TEST_DURATION_SECS;
        }
        if self.history_hours == 0 || self.history_hours > MAX_HISTORY_HOURS {
            tracing::warn!(value = self.history_hours, max = MAX_HISTORY_HOURS, fallback = FALLBACK_HISTORY_HOURS, "history_hours out of range");
            self.history_hours = FALLBACK_HISTORY_HOURS;
        }
        if self.merge_window_minutes == 0 || self.merge_window_minutes > MAX_MERGE_WINDOW_MINUTES {
            tracing::warn!(value = self.merge_window_minutes, max = MAX_MERGE_WINDOW_MINUTES, "merge_window_minutes out of range, using default");
            self.merge_window_minutes = DEFAULT_MERGE_WINDOW_MINUTES;
        }
        if self.status_max_len < 16 {
            tracing::warn!(value = self.status_max_len, "status_max_len too small, using default");
            self.status_max_len = DEFAULT_STATUS_MAX_LEN;
        }
        if self.attr_max_len < self.status_max_len {
            tracing::warn!(value = self.attr_max_len, "attr_max_len below status_max_len, using default");
            self.attr_max_len = DEFAULT_ATTR_MAX_LEN.max(self.status_max_len);
        }
        if self.message_max_len < 16 {
            tracing::warn!(value = self.message_max_len, "message_max_len too small, using default");
            self.message_max_len = DEFAULT_MESSAGE_MAX_LEN;
        }
        if self.sensor_name.trim().is_empty() {
            tracing::warn!("sensor_name is blank, using default");
            self.sensor_name = DEFAULT_SENSOR_NAME.to_string();
        }

        let before = self.watched_locations.len();
        self.watched_locations = self
            .watched_locations
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if self.watched_locations.len() != before {
            tracing::warn!(dropped = before - self.watched_locations.len(), "blank watched_locations entries skipped");
        }
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn idle_timeout(&self) -> chrono::Duration {
        seconds(self.idle_timeout_secs)
    }

    pub fn test_duration(&self) -> chrono::Duration {
        seconds(self.test_duration_secs)
    }

    pub fn history_horizon(&self) -> chrono::Duration {
        seconds(self.history_hours.saturating_mul(3600))
    }

    pub fn merge_window(&self) -> chrono::Duration {
        seconds(self.merge_window_minutes.saturating_mul(60))
    }
}

fn seconds(n: u64) -> chrono::Duration {
    i64::try_from(n)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}
