//! Engine facade
//!
//! Owns the window machine, history store and renderer, and turns each
//! feed poll into a list of events for the sinks. No I/O happens here: every
//! call runs to completion and returns what changed.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::AppConfig;
use crate::core::canonical::canonicalize;
use crate::core::clock::Clock;
use crate::core::feed::AlertFeed;
use crate::core::gazetteer::{resolve_or_unknown, Gazetteer, LocationResolver};
use crate::core::history::HistoryStore;
use crate::core::renderer::{RenderLimits, WindowRenderer};
use crate::core::window::AlertWindowMachine;
use crate::error::GazetteerError;
use crate::types::{
    AlertWindow, CanonicalLocation, ClosedWindow, FeedPoll, FoldOutcome, GroupedLocations, HistoryRecord,
    HistoryView, LastKnownState, PreviousWindow, RawSnapshot, RenderedWindow, TestRejection,
    WindowState,
};
use crate::{TEST_ALERT_CATEGORY, TEST_ALERT_DESCRIPTION, TEST_ALERT_TITLE, TEST_DEFAULT_LOCATION};

/// Rendered projection plus the raw accumulation state behind it
#[derive(Debug, Clone, Serialize)]
pub struct WindowUpdate {
    pub rendered: RenderedWindow,
    /// Canonical keys accumulated since the window opened
    pub accumulated: BTreeSet<String>,
    pub sequence_count: u32,
    pub grouped: GroupedLocations,
    /// Accumulated locations, ordered by key
    pub locations: Vec<CanonicalLocation>,
    pub history: HistoryView,
    /// A watched location is part of this window
    pub watched_hit: bool,
    pub is_test: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum EngineEvent {
    WindowUpdated(Box<WindowUpdate>),
    WindowClosed(ClosedWindow),
    StateSaved(LastKnownState),
    HistoryRefreshed(HistoryView),
    Terminated(RenderedWindow),
}

pub struct Engine {
    cfg: AppConfig,
    clock: Arc<dyn Clock>,
    resolver: Arc<dyn LocationResolver>,
    machine: AlertWindowMachine,
    history: HistoryStore,
    renderer: WindowRenderer,
    previous: Option<PreviousWindow>,
    last_rendered: Option<RenderedWindow>,
    last_saved_id: Option<String>,
    /// (canonical key, display name) of each watched location
    watched: Vec<(String, String)>,
}

impl Engine {
    pub fn new(cfg: AppConfig, resolver: Arc<dyn LocationResolver>, clock: Arc<dyn Clock>) -> Self {
        let cfg = cfg.validated();
        let mut watched = Vec::new();
        for raw in &cfg.watched_locations {
            let key = canonicalize(raw);
            if key.is_empty() {
                continue;
            }
            match resolver.resolve(&key) {
                Some(loc) => watched.push((key, loc.display_name)),
                None => {
                    tracing::warn!(location = %raw, "watched location not in gazetteer");
                    watched.push((key, raw.trim().to_string()));
                }
            }
        }

        Self {
            machine: AlertWindowMachine::new(cfg.idle_timeout()),
            renderer: WindowRenderer::new(RenderLimits::from(&cfg)),
            history: HistoryStore::new(),
            previous: None,
            last_rendered: None,
            last_saved_id: None,
            watched,
            cfg,
            clock,
            resolver,
        }
    }

    /// Engine over the configured gazetteer, loaded the same way the supervisor
    /// loads it. No gazetteer means no engine.
    pub async fn with_gazetteer(
        cfg: AppConfig,
        feed: &dyn AlertFeed,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, GazetteerError> {
        let gazetteer = Gazetteer::load(&cfg.gazetteer_path, feed).await?;
        Ok(Self::new(cfg, Arc::new(gazetteer), clock))
    }

    /// Handle one live-feed poll
    pub fn process_poll(&mut self, poll: FeedPoll) -> Vec<EngineEvent> {
        let now = self.clock.now();
        match poll {
            FeedPoll::Active(snapshot) => self.apply(&snapshot, now, false),
            quiet => self.quiet(quiet.confirms_idle(), now),
        }
    }

    /// Inject a synthetic alert for the watched locations
    pub fn trigger_test(&mut self) -> Result<Vec<EngineEvent>, TestRejection> {
        let now = self.clock.now();
        let until = now
            .checked_add_signed(self.cfg.test_duration())
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.machine.start_test(until)?;

        let locations: Vec<String> = if self.watched.is_empty() {
            tracing::warn!(location = TEST_DEFAULT_LOCATION, "no watched locations, testing with default");
            vec![TEST_DEFAULT_LOCATION.to_string()]
        } else {
            self.watched.iter().map(|(_, display)| display.clone()).collect()
        };
        let snapshot = RawSnapshot::new(
            now.timestamp_millis().to_string(),
            TEST_ALERT_CATEGORY,
            TEST_ALERT_TITLE,
            TEST_ALERT_DESCRIPTION,
            locations,
        );
        tracing::warn!(alert_id = %snapshot.id, locations = snapshot.locations.len(), "test alert injected");

        let events = self.apply(&snapshot, now, true);
        if !matches!(events.first(), Some(EngineEvent::WindowUpdated(_))) {
            self.machine.abort_test();
        }
        Ok(events)
    }

    fn apply(&mut self, snapshot: &RawSnapshot, now: DateTime<Utc>, is_test: bool) -> Vec<EngineEvent> {
        let fold = self.machine.fold(snapshot, self.resolver.as_ref(), now, is_test);
        if !fold.outcome.changed() {
            return vec![EngineEvent::HistoryRefreshed(self.history_view())];
        }

        for loc in &fold.observed {
            self.history.append(&snapshot.title, loc, now);
        }

        let rendered = self.renderer.render(self.machine.window(), self.previous.as_ref(), now);
        if fold.outcome == FoldOutcome::Opened {
            tracing::info!(alert_id = %snapshot.id, title = %snapshot.title, is_test, "alert window opened");
        }
        self.last_rendered = Some(rendered.clone());

        let mut events = vec![self.update_event(rendered.clone())];
        if !is_test && self.last_saved_id.as_deref() != Some(snapshot.id.as_str()) {
            self.last_saved_id = Some(snapshot.id.clone());
            events.push(EngineEvent::StateSaved(LastKnownState {
                id: snapshot.id.clone(),
                category: snapshot.category,
                title: snapshot.title.clone(),
                locations: rendered.locations.clone(),
                description: snapshot.description.clone(),
                alert_date: now,
                last_changed: now,
                alerts_count: rendered.sequence_count,
            }));
        }
        events
    }

    fn quiet(&mut self, confirms_idle: bool, now: DateTime<Utc>) -> Vec<EngineEvent> {
        if self.machine.observe_quiet_poll(confirms_idle, now) {
            self.close_window(now)
        } else {
            vec![EngineEvent::HistoryRefreshed(self.history_view())]
        }
    }

    fn close_window(&mut self, now: DateTime<Utc>) -> Vec<EngineEvent> {
        let window = self.machine.window();
        let final_render = self.renderer.render(window, self.previous.as_ref(), now);
        let record = ClosedWindow {
            id: final_render.id.clone(),
            category: final_render.category,
            title: final_render.title.clone(),
            description: final_render.description.clone(),
            areas: final_render.areas.clone(),
            locations: final_render.locations.clone(),
            full_message: final_render.full_message.clone(),
            sequence_count: window.sequence_count,
            started_at: window.started_at.unwrap_or(now),
            closed_at: now,
            is_test: window.is_test,
        };
        tracing::info!(
            alert_id = %record.id,
            locations = record.locations.len(),
            sequence = record.sequence_count,
            "alert window closed"
        );

        self.previous = Some(PreviousWindow::from(&final_render));
        self.last_rendered = None;

        let mut events = Vec::with_capacity(2);
        if let Some(record) = self.machine.close(record) {
            events.push(EngineEvent::WindowClosed(record));
        }
        let idle = self.renderer.render_idle(self.previous.as_ref(), now);
        events.push(self.update_event(idle));
        events
    }

    fn update_event(&self, rendered: RenderedWindow) -> EngineEvent {
        EngineEvent::WindowUpdated(Box::new(self.build_update(rendered)))
    }

    fn build_update(&self, rendered: RenderedWindow) -> WindowUpdate {
        let window = self.machine.window();
        let accumulated = window.accumulated_keys();
        let watched_hit = self.watched_hit(window, &accumulated);
        WindowUpdate {
            rendered,
            sequence_count: window.sequence_count,
            grouped: window.grouped.clone(),
            locations: window.locations.values().cloned().collect(),
            history: self.history_view(),
            watched_hit,
            is_test: window.is_test,
            accumulated,
        }
    }

    fn watched_hit(&self, window: &AlertWindow, accumulated: &BTreeSet<String>) -> bool {
        if self.watched.is_empty() {
            return false;
        }
        window.is_test || self.watched.iter().any(|(key, _)| accumulated.contains(key))
    }

    /// Seed history from the upstream history feed
    pub fn seed_history(&mut self, records: &[HistoryRecord]) -> usize {
        let now = self.clock.now();
        self.history
            .seed(records, self.resolver.as_ref(), now, self.cfg.history_horizon())
    }

    /// Warm restart: rebuild the previous-window baseline from a saved state
    pub fn restore_previous(&mut self, state: &LastKnownState) {
        let mut window = AlertWindow {
            sequence_count: state.alerts_count,
            last_activity: Some(state.last_changed),
            started_at: Some(state.alert_date),
            ..AlertWindow::default()
        };
        for raw in &state.locations {
            let key = canonicalize(raw);
            if key.is_empty() {
                continue;
            }
            let loc = resolve_or_unknown(self.resolver.as_ref(), &key, raw);
            window
                .grouped
                .entry(state.title.clone())
                .or_default()
                .entry(loc.area.clone())
                .or_default()
                .insert(loc.display_name.clone());
            window.locations.entry(key).or_insert(loc);
        }
        window.latest = Some(RawSnapshot::new(
            state.id.clone(),
            state.category,
            state.title.clone(),
            state.description.clone(),
            state.locations.clone(),
        ));

        let rendered = self.renderer.render(&window, None, state.last_changed);
        self.previous = Some(PreviousWindow::from(&rendered));
        self.last_saved_id = Some(state.id.clone());
        tracing::info!(alert_id = %state.id, "previous window restored");
    }

    /// Shutdown marker for every sink
    pub fn terminate(&mut self) -> Vec<EngineEvent> {
        let now = self.clock.now();
        let rendered = self.renderer.render_idle(self.previous.as_ref(), now);
        vec![EngineEvent::Terminated(rendered)]
    }

    /// Drop history entries past the horizon
    pub fn maintain(&mut self) -> usize {
        let pruned = self.history.prune(self.clock.now(), self.cfg.history_horizon());
        if pruned > 0 {
            tracing::debug!(pruned, "history pruned");
        }
        pruned
    }

    pub fn history_view(&self) -> HistoryView {
        self.history
            .query(self.cfg.history_horizon(), self.cfg.merge_window(), self.clock.now())
    }

    /// Latest projection: the active window, or idle with its baseline
    pub fn current(&self) -> RenderedWindow {
        match &self.last_rendered {
            Some(r) if self.machine.state().is_active() => r.clone(),
            _ => self.renderer.render_idle(self.previous.as_ref(), self.clock.now()),
        }
    }

    /// Full update for the current state, as sinks receive it
    pub fn snapshot(&self) -> WindowUpdate {
        self.build_update(self.current())
    }

    pub fn state(&self) -> WindowState {
        self.machine.state()
    }

    pub fn window(&self) -> &AlertWindow {
        self.machine.window()
    }

    pub fn previous(&self) -> Option<&PreviousWindow> {
        self.previous.as_ref()
    }

    pub fn test_running(&self) -> bool {
        self.machine.test_running()
    }

    pub fn config(&self) -> &AppConfig {
        &self.cfg
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("state", &self.machine.state())
            .field("window", self.machine.window())
            .field("history_len", &self.history.len())
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::core::feed::StaticFeed;
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    const ROCKETS: &str = "ירי רקטות וטילים";

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 13, 3, 0, 0).unwrap()
    }

    fn engine_with(cfg: AppConfig) -> (Engine, ManualClock) {
        let clock = ManualClock::new(t0());
        let gazetteer = Gazetteer::new()
            .with_location("עוטף עזה", "שדרות", None)
            .with_location("עוטף עזה", "ניר עם", None)
            .with_location("מערב לכיש", "אשקלון - דרום", None);
        let engine = Engine::new(cfg, Arc::new(gazetteer), Arc::new(clock.clone()));
        (engine, clock)
    }

    fn engine() -> (Engine, ManualClock) {
        engine_with(AppConfig::default())
    }

    fn active(id: &str, locations: &[&str]) -> FeedPoll {
        FeedPoll::Active(RawSnapshot::new(
            id,
            1,
            ROCKETS,
            "היכנסו למרחב המוגן",
            locations.iter().map(|s| s.to_string()).collect(),
        ))
    }

    fn update(events: &[EngineEvent]) -> &WindowUpdate {
        events
            .iter()
            .find_map(|e| match e {
                EngineEvent::WindowUpdated(u) => Some(u.as_ref()),
                _ => None,
            })
            .expect("no WindowUpdated event")
    }

    #[test]
    fn test_open_emits_update_and_state() {
        let (mut engine, _) = engine();
        let events = engine.process_poll(active("100", &["שדרות"]));

        assert_eq!(events.len(), 2);
        let u = update(&events);
        assert_eq!(u.rendered.state, WindowState::Active);
        assert_eq!(u.rendered.status_line, "ירי רקטות וטילים - עוטף עזה: שדרות");
        assert_eq!(u.sequence_count, 1);
        assert_eq!(u.history.len(), 1);
        assert!(matches!(&events[1], EngineEvent::StateSaved(s) if s.id == "100"));
    }

    #[test]
    fn test_duplicate_poll_only_refreshes_history() {
        let (mut engine, clock) = engine();
        engine.process_poll(active("100", &["שדרות"]));
        clock.advance(Duration::seconds(5));

        let events = engine.process_poll(active("100", &["שדרות"]));
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], EngineEvent::HistoryRefreshed(_)));
        assert_eq!(engine.window().sequence_count, 1);
        assert_eq!(engine.history_len(), 1);
    }

    #[test]
    fn test_state_saved_once_per_id() {
        let (mut engine, _) = engine();
        engine.process_poll(active("100", &["שדרות"]));
        let events = engine.process_poll(active("100", &["שדרות", "ניר עם"]));

        assert_eq!(events.len(), 1);
        assert_eq!(update(&events).rendered.location_count, 2);
    }

    #[test]
    fn test_window_closes_after_timeout() {
        let (mut engine, clock) = engine();
        engine.process_poll(active("100", &["שדרות", "ניר עם"]));

        clock.advance(Duration::seconds(60));
        let events = engine.process_poll(FeedPoll::Idle);
        assert!(matches!(events[0], EngineEvent::HistoryRefreshed(_)));
        assert_eq!(engine.state(), WindowState::Active);

        clock.advance(Duration::seconds(65));
        let events = engine.process_poll(FeedPoll::Idle);
        let closed = match &events[0] {
            EngineEvent::WindowClosed(c) => c,
            other => panic!("expected WindowClosed, got {:?}", other),
        };
        assert_eq!(closed.locations, vec!["ניר עם", "שדרות"]);
        assert_eq!(closed.started_at, t0());
        assert_eq!(engine.state(), WindowState::Idle);

        let idle = update(&events);
        assert_eq!(idle.rendered.state, WindowState::Idle);
        let previous = idle.rendered.previous.as_ref().expect("previous window");
        assert_eq!(previous.id, "100");
        assert_eq!(previous.location_count, 2);
    }

    #[test]
    fn test_unavailable_polls_keep_window_open() {
        let (mut engine, clock) = engine();
        engine.process_poll(active("100", &["שדרות"]));
        for _ in 0..10 {
            clock.advance(Duration::seconds(60));
            engine.process_poll(FeedPoll::Unavailable);
        }
        assert_eq!(engine.state(), WindowState::Active);

        // The first confirming poll closes it
        let events = engine.process_poll(FeedPoll::Idle);
        assert!(matches!(events[0], EngineEvent::WindowClosed(_)));
    }

    #[test]
    fn test_history_survives_window_close() {
        let (mut engine, clock) = engine();
        engine.process_poll(active("100", &["שדרות"]));
        clock.advance(Duration::seconds(200));
        engine.process_poll(FeedPoll::Idle);

        let view = engine.history_view();
        assert_eq!(view.locations, vec!["שדרות"]);
        assert_eq!(engine.current().state, WindowState::Idle);
    }

    #[test]
    fn test_trigger_test_uses_watched_locations() {
        let mut cfg = AppConfig::default();
        cfg.watched_locations = vec!["שדרות".to_string()];
        let (mut engine, clock) = engine_with(cfg);

        let events = engine.trigger_test().expect("test accepted");
        assert_eq!(events.len(), 1);
        let u = update(&events);
        assert!(u.is_test);
        assert!(u.watched_hit);
        assert_eq!(u.rendered.locations, vec!["שדרות"]);
        assert_eq!(engine.trigger_test().unwrap_err(), TestRejection::TestAlreadyRunning);

        // Held open past the idle timeout until the test duration ends
        clock.advance(Duration::seconds(121));
        let events = engine.process_poll(FeedPoll::Idle);
        assert!(matches!(events[0], EngineEvent::WindowClosed(ref c) if c.is_test));
    }

    #[test]
    fn test_trigger_test_rejected_during_real_window() {
        let (mut engine, _) = engine();
        engine.process_poll(active("100", &["שדרות"]));
        assert_eq!(engine.trigger_test().unwrap_err(), TestRejection::RealWindowActive);
    }

    #[test]
    fn test_watched_hit_only_for_watched_keys() {
        let mut cfg = AppConfig::default();
        cfg.watched_locations = vec!["אשקלון - דרום".to_string()];
        let (mut engine, _) = engine_with(cfg);

        let events = engine.process_poll(active("100", &["שדרות"]));
        assert!(!update(&events).watched_hit);
        let events = engine.process_poll(active("101", &["(אשקלון - דרום)"]));
        assert!(update(&events).watched_hit);
    }

    #[test]
    fn test_restore_previous_sets_baseline() {
        let (mut engine, _) = engine();
        engine.restore_previous(&LastKnownState {
            id: "99".to_string(),
            category: 1,
            title: ROCKETS.to_string(),
            locations: vec!["שדרות".to_string(), "ניר עם".to_string()],
            description: String::new(),
            alert_date: t0() - Duration::hours(1),
            last_changed: t0() - Duration::hours(1),
            alerts_count: 3,
        });

        let current = engine.current();
        assert_eq!(current.state, WindowState::Idle);
        let previous = current.previous.expect("previous window");
        assert_eq!(previous.id, "99");
        assert_eq!(previous.sequence_count, 3);
        assert_eq!(previous.locations_summary, "ניר עם, שדרות");

        // Same id is not saved again
        let events = engine.process_poll(active("99", &["שדרות"]));
        assert!(!events.iter().any(|e| matches!(e, EngineEvent::StateSaved(_))));
    }

    #[test]
    fn test_oversized_durations_do_not_overflow() {
        let cfg = AppConfig {
            history_hours: 10_000_000_000,
            test_duration_secs: u64::MAX,
            ..AppConfig::default()
        };
        let (mut engine, clock) = engine_with(cfg);
        assert_eq!(engine.config().history_hours, crate::FALLBACK_HISTORY_HOURS);

        let events = engine.trigger_test().expect("test accepted");
        assert!(update(&events).is_test);
        assert_eq!(engine.history_view().len(), 1);

        clock.advance(Duration::seconds(crate::DEFAULT_TEST_DURATION_SECS as i64 + 1));
        engine.process_poll(FeedPoll::Idle);
        assert_eq!(engine.state(), WindowState::Idle);
    }

    #[tokio::test]
    async fn test_with_gazetteer_requires_a_source() {
        let dir = tempfile::TempDir::new().unwrap();
        let cfg = AppConfig {
            gazetteer_path: dir.path().join("lamas.json"),
            ..AppConfig::default()
        };
        let clock = Arc::new(ManualClock::new(t0()));

        let result = Engine::with_gazetteer(cfg.clone(), &StaticFeed::default(), clock.clone()).await;
        assert!(result.is_err());

        std::fs::write(&cfg.gazetteer_path, r#"{"areas": {"עוטף עזה": {"שדרות": {}}}}"#).unwrap();
        let mut engine = Engine::with_gazetteer(cfg, &StaticFeed::default(), clock).await.unwrap();
        let events = engine.process_poll(active("1", &["שדרות"]));
        assert_eq!(update(&events).rendered.areas, vec!["עוטף עזה"]);
    }

    #[test]
    fn test_seed_and_maintain() {
        let (mut engine, clock) = engine();
        let records = vec![HistoryRecord {
            title: ROCKETS.to_string(),
            location: "שדרות".to_string(),
            observed_at: t0() - Duration::hours(11),
        }];
        assert_eq!(engine.seed_history(&records), 1);
        assert_eq!(engine.maintain(), 0);

        clock.advance(Duration::hours(2));
        assert!(engine.history_view().is_empty());
        assert_eq!(engine.maintain(), 1);
    }

    #[test]
    fn test_terminate_reports_idle_projection() {
        let (mut engine, _) = engine();
        let events = engine.terminate();
        assert!(matches!(&events[0], EngineEvent::Terminated(r) if r.state == WindowState::Idle));
    }
}
