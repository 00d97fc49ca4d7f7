//! Oref feed client
//!
//! The live endpoint answers with a BOM-prefixed JSON object while an alert is
//! up and with an empty body (or bare CRLF) otherwise. Anything that cannot be
//! read as either of those is reported as `FeedPoll::Unavailable`.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CACHE_CONTROL, PRAGMA, REFERER, USER_AGENT};
use serde_json::Value;

use crate::config::FeedConfig;
use crate::error::FeedError;
use crate::types::{FeedPoll, HistoryRecord, RawSnapshot};
use crate::DEFAULT_TITLE;

const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Source of raw feed data
#[async_trait]
pub trait AlertFeed: Send + Sync {
    /// One live poll. Never fails; problems map to `FeedPoll::Unavailable`.
    async fn fetch_live(&self) -> FeedPoll;

    /// Recent history used to seed the store at startup
    async fn fetch_history(&self) -> Result<Vec<HistoryRecord>, FeedError>;

    /// Raw gazetteer document
    async fn fetch_gazetteer(&self) -> Result<String, FeedError>;
}

pub fn strip_bom(text: &str) -> &str {
    text.trim_start_matches('\u{feff}')
}

// =============================================================================
// HTTP CLIENT
// =============================================================================

#[derive(Debug, Clone)]
pub struct OrefFeedClient {
    http: reqwest::Client,
    cfg: FeedConfig,
}

impl OrefFeedClient {
    pub fn new(cfg: FeedConfig) -> Result<Self, FeedError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
        headers.insert(REFERER, HeaderValue::from_static("https://www.oref.org.il/"));
        headers.insert("X-Requested-With", HeaderValue::from_static("XMLHttpRequest"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .connect_timeout(Duration::from_secs(cfg.connect_timeout_secs))
            .build()?;
        Ok(Self { http, cfg })
    }

    async fn get_once(&self, url: &str) -> Result<String, FeedError> {
        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FeedError::Status(status.as_u16()));
        }
        let bytes = resp.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// GET with exponential backoff (0.5s, 1s, ...) on transport and 5xx errors
    async fn get_text(&self, url: &str) -> Result<String, FeedError> {
        let mut attempt: u32 = 0;
        loop {
            match self.get_once(url).await {
                Ok(text) => return Ok(text),
                Err(e) if attempt < self.cfg.retries && is_retryable(&e) => {
                    let delay = Duration::from_millis(500u64.saturating_mul(1 << attempt.min(10)));
                    tracing::debug!(url, attempt = attempt + 1, delay_ms = delay.as_millis() as u64, error = %e, "retrying feed request");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn is_retryable(e: &FeedError) -> bool {
    match e {
        FeedError::Http(_) => true,
        FeedError::Status(code) => *code >= 500,
        FeedError::Malformed(_) => false,
    }
}

#[async_trait]
impl AlertFeed for OrefFeedClient {
    async fn fetch_live(&self) -> FeedPoll {
        match self.get_text(&self.cfg.live_url).await {
            Ok(text) => parse_live_body(&text),
            Err(e) => {
                tracing::warn!(error = %e, "live feed fetch failed");
                FeedPoll::Unavailable
            }
        }
    }

    async fn fetch_history(&self) -> Result<Vec<HistoryRecord>, FeedError> {
        let text = self.get_text(&self.cfg.history_url).await?;
        parse_history_body(&text)
    }

    async fn fetch_gazetteer(&self) -> Result<String, FeedError> {
        self.get_text(&self.cfg.gazetteer_url).await
    }
}

// =============================================================================
// BODY PARSING
// =============================================================================

/// Classify one live-feed body
pub fn parse_live_body(text: &str) -> FeedPoll {
    let body = strip_bom(text).trim();
    if body.is_empty() {
        return FeedPoll::Idle;
    }
    let value: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => {
            let preview: String = body.chars().take(120).collect();
            tracing::warn!(error = %e, preview = %preview, "malformed live feed body");
            return FeedPoll::Unavailable;
        }
    };
    if !value.is_object() {
        tracing::warn!("live feed body is not an object");
        return FeedPoll::Unavailable;
    }
    match parse_snapshot(&value) {
        Some(snapshot) => FeedPoll::Active(snapshot),
        None => FeedPoll::Idle,
    }
}

/// Lenient payload mapping. `None` when there is no location data.
pub fn parse_snapshot(value: &Value) -> Option<RawSnapshot> {
    let locations: Vec<String> = match value.get("data")? {
        Value::Array(items) => items.iter().filter_map(scalar_string).collect(),
        Value::String(s) => s.split(',').map(str::to_string).collect(),
        _ => return None,
    };
    let locations: Vec<String> = locations
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if locations.is_empty() {
        return None;
    }

    let id = value.get("id").and_then(scalar_string).unwrap_or_default();
    let category = value
        .get("cat")
        .and_then(scalar_string)
        .and_then(|s| s.trim().parse::<u8>().ok())
        .unwrap_or(1);
    let title = value
        .get("title")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_TITLE)
        .to_string();
    let description = value
        .get("desc")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();

    Some(RawSnapshot {
        id,
        category,
        title,
        description,
        locations,
    })
}

fn scalar_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse the history feed: a list of `{title, data, alertDate}`
pub fn parse_history_body(text: &str) -> Result<Vec<HistoryRecord>, FeedError> {
    let body = strip_bom(text).trim();
    if body.is_empty() {
        return Ok(Vec::new());
    }
    let value: Value =
        serde_json::from_str(body).map_err(|e| FeedError::Malformed(e.to_string()))?;
    let Value::Array(items) = value else {
        return Err(FeedError::Malformed("history body is not a list".to_string()));
    };

    let mut records = Vec::with_capacity(items.len());
    let mut skipped = 0usize;
    for item in &items {
        let location = item.get("data").and_then(scalar_string).map(|s| s.trim().to_string());
        let observed_at = item.get("alertDate").and_then(Value::as_str).and_then(parse_alert_date);
        match (location, observed_at) {
            (Some(location), Some(observed_at)) if !location.is_empty() => {
                let title = item
                    .get("title")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .unwrap_or(DEFAULT_TITLE)
                    .to_string();
                records.push(HistoryRecord {
                    title,
                    location,
                    observed_at,
                });
            }
            _ => skipped += 1,
        }
    }
    if skipped > 0 {
        tracing::warn!(skipped, total = items.len(), "history records without location or parseable date");
    }
    Ok(records)
}

/// Upstream dates are local wall-clock time, sometimes carrying a suffix
pub fn parse_alert_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    // A trailing 'Z' is a formatting artifact, the clock is still local
    if !raw.ends_with('Z') {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    let naive_part = raw.trim_end_matches('Z');
    let naive_part = naive_part.split('+').next().unwrap_or(naive_part);

    const FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
    ];
    let naive = FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(naive_part, f).ok())?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

// =============================================================================
// SCRIPTED FEED
// =============================================================================

/// Feed that replays queued polls; `Idle` once the queue is drained
#[derive(Debug, Default)]
pub struct StaticFeed {
    pub live: Mutex<VecDeque<FeedPoll>>,
    pub history: Vec<HistoryRecord>,
    pub gazetteer: Option<String>,
}

impl StaticFeed {
    pub fn with_polls(polls: impl IntoIterator<Item = FeedPoll>) -> Self {
        Self {
            live: Mutex::new(polls.into_iter().collect()),
            ..Default::default()
        }
    }

    pub fn push(&self, poll: FeedPoll) {
        self.live.lock().unwrap_or_else(|e| e.into_inner()).push_back(poll);
    }
}

#[async_trait]
impl AlertFeed for StaticFeed {
    async fn fetch_live(&self) -> FeedPoll {
        self.live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or(FeedPoll::Idle)
    }

    async fn fetch_history(&self) -> Result<Vec<HistoryRecord>, FeedError> {
        Ok(self.history.clone())
    }

    async fn fetch_gazetteer(&self) -> Result<String, FeedError> {
        self.gazetteer
            .clone()
            .ok_or_else(|| FeedError::Malformed("no gazetteer document".to_string()))
    }
}
