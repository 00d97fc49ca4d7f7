//! Integration tests for the engine
//!
//! Tests the full path: feed body → parse → Engine → events

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use pretty_assertions::assert_eq;

use redalert::config::AppConfig;
use redalert::core::{parse_live_body, Engine, EngineEvent, Gazetteer, ManualClock, WindowUpdate};
use redalert::types::{FeedPoll, TestRejection, WindowState};

const ROCKETS_BODY: &str = "\u{feff}{\"id\": \"133944\", \"cat\": \"1\", \"title\": \"ירי רקטות וטילים\", \"desc\": \"היכנסו למרחב המוגן ושהו בו 10 דקות\", \"data\": [\"שדרות\", \"ניר עם\"]}";

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 13, 3, 0, 0).unwrap()
}

fn gazetteer() -> Gazetteer {
    Gazetteer::from_json(
        r#"{"areas": {
            "עוטף עזה": {"שדרות": {"lat": 31.52, "long": 34.59}, "ניר עם": {"lat": 31.51, "long": 34.58}},
            "מערב לכיש": {"אשקלון - דרום": {"lat": 31.64, "long": 34.55}}
        }}"#,
    )
    .unwrap()
}

fn engine(cfg: AppConfig) -> (Engine, ManualClock) {
    let clock = ManualClock::new(t0());
    let engine = Engine::new(cfg, Arc::new(gazetteer()), Arc::new(clock.clone()));
    (engine, clock)
}

fn last_update(events: &[EngineEvent]) -> Option<&WindowUpdate> {
    events.iter().rev().find_map(|e| match e {
        EngineEvent::WindowUpdated(u) => Some(u.as_ref()),
        _ => None,
    })
}

/// Test a full window: open, redelivery, growth, close
#[test]
fn test_full_window_lifecycle() {
    let (mut engine, clock) = engine(AppConfig::default());

    let events = engine.process_poll(parse_live_body(ROCKETS_BODY));
    let update = last_update(&events).unwrap();
    assert_eq!(update.rendered.state, WindowState::Active);
    assert_eq!(update.rendered.duration_secs, 600);
    assert_eq!(update.rendered.icon, "mdi:rocket-launch");

    // Same body redelivered: no new fold
    clock.advance(Duration::seconds(5));
    engine.process_poll(parse_live_body(ROCKETS_BODY));
    assert_eq!(engine.window().sequence_count, 1);

    // New id, one more location
    clock.advance(Duration::seconds(5));
    let body = ROCKETS_BODY
        .replace("133944", "133945")
        .replace("\"ניר עם\"]", "\"ניר עם\", \"אשקלון - דרום\"]");
    let events = engine.process_poll(parse_live_body(&body));
    let update = last_update(&events).unwrap();
    assert_eq!(update.sequence_count, 2);
    assert_eq!(update.rendered.areas, vec!["מערב לכיש", "עוטף עזה"]);
    assert_eq!(update.history.len(), 3);

    // Empty bodies until the timeout passes
    clock.advance(Duration::seconds(60));
    engine.process_poll(parse_live_body("\r\n"));
    assert_eq!(engine.state(), WindowState::Active);
    clock.advance(Duration::seconds(61));
    let events = engine.process_poll(parse_live_body(""));

    let closed: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::WindowClosed(c) => Some(c),
            _ => None,
        })
        .collect();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].id, "133945");
    assert_eq!(closed[0].sequence_count, 2);
    assert_eq!(closed[0].locations.len(), 3);
    assert_eq!(engine.state(), WindowState::Idle);

    // Further idle polls do not close again
    clock.advance(Duration::seconds(5));
    let events = engine.process_poll(FeedPoll::Idle);
    assert!(events.iter().all(|e| !matches!(e, EngineEvent::WindowClosed(_))));
}

/// Malformed bodies never confirm idleness
#[test]
fn test_malformed_bodies_hold_window() {
    let (mut engine, clock) = engine(AppConfig::default());
    engine.process_poll(parse_live_body(ROCKETS_BODY));

    for _ in 0..5 {
        clock.advance(Duration::seconds(60));
        let poll = parse_live_body("<html>blocked</html>");
        assert_eq!(poll, FeedPoll::Unavailable);
        engine.process_poll(poll);
    }
    assert_eq!(engine.state(), WindowState::Active);

    engine.process_poll(FeedPoll::Idle);
    assert_eq!(engine.state(), WindowState::Idle);
}

/// A drill-only body never opens a window
#[test]
fn test_drill_body_ignored() {
    let (mut engine, _) = engine(AppConfig::default());
    let body = r#"{"id": "1", "cat": "1", "title": "ירי רקטות וטילים", "data": ["בדיקה", "תרגיל 2"]}"#;
    let events = engine.process_poll(parse_live_body(body));
    assert!(matches!(events[..], [EngineEvent::HistoryRefreshed(_)]));
    assert_eq!(engine.state(), WindowState::Idle);
}

/// Previous window carried as baseline into the next one
#[test]
fn test_previous_window_baseline() {
    let (mut engine, clock) = engine(AppConfig::default());
    engine.process_poll(parse_live_body(ROCKETS_BODY));
    clock.advance(Duration::seconds(200));
    engine.process_poll(FeedPoll::Idle);

    clock.advance(Duration::minutes(30));
    let body = ROCKETS_BODY.replace("133944", "140000").replace("\"שדרות\", ", "");
    let events = engine.process_poll(parse_live_body(&body));
    let update = last_update(&events).unwrap();

    assert_eq!(update.rendered.locations, vec!["ניר עם"]);
    let previous = update.rendered.previous.as_ref().unwrap();
    assert_eq!(previous.id, "133944");
    assert_eq!(previous.locations_summary, "ניר עם, שדרות");
}

/// 50 long names force the short status form and then truncation
#[test]
fn test_status_line_with_many_locations() {
    let (mut engine, _) = engine(AppConfig::default());
    let names: Vec<String> = (0..50).map(|i| format!("\"יישוב מספר {:02}\"", i)).collect();
    let body = format!(
        r#"{{"id": "9", "cat": "1", "title": "ירי רקטות וטילים", "data": [{}]}}"#,
        names.join(", ")
    );
    let events = engine.process_poll(parse_live_body(&body));
    let update = last_update(&events).unwrap();

    let status = &update.rendered.status_line;
    assert_eq!(status.chars().count(), 255);
    assert!(status.ends_with('…'));
    assert!(status.starts_with("ישראל: "));
    assert_eq!(update.rendered.location_count, 50);
}

/// Test path exclusivity in both directions
#[test]
fn test_test_path_exclusivity() {
    let mut cfg = AppConfig::default();
    cfg.watched_locations = vec!["ניר עם".to_string()];
    let (mut engine, clock) = engine(cfg);

    engine.process_poll(parse_live_body(ROCKETS_BODY));
    assert_eq!(engine.trigger_test().unwrap_err(), TestRejection::RealWindowActive);
    assert_eq!(engine.window().sequence_count, 1);

    clock.advance(Duration::seconds(200));
    engine.process_poll(FeedPoll::Idle);

    let events = engine.trigger_test().unwrap();
    assert!(last_update(&events).unwrap().is_test);
    assert!(engine.test_running());

    clock.advance(Duration::seconds(10));
    let body = ROCKETS_BODY.replace("133944", "150000");
    let events = engine.process_poll(parse_live_body(&body));
    let update = last_update(&events).unwrap();
    assert!(!engine.test_running());
    assert!(!update.is_test);
    assert_eq!(update.sequence_count, 2);
    assert!(events.iter().any(|e| matches!(e, EngineEvent::StateSaved(_))));
}

/// Configured merge window drives the history view
#[test]
fn test_merge_window_from_config() {
    let mut cfg = AppConfig::default();
    cfg.merge_window_minutes = 50;
    let (mut engine, clock) = engine(cfg);

    engine.process_poll(parse_live_body(ROCKETS_BODY));
    clock.advance(Duration::seconds(200));
    engine.process_poll(FeedPoll::Idle);

    clock.advance(Duration::minutes(30));
    engine.process_poll(parse_live_body(&ROCKETS_BODY.replace("133944", "2")));

    // 30 minutes apart, inside a 50 minute window: one entry per location
    let view = engine.history_view();
    assert_eq!(view.len(), 2);
    assert!(view.items.iter().all(|i| i.observed_at == t0() + Duration::seconds(200) + Duration::minutes(30)));
}
