//! Supervisor
//!
//! Owns the engine for the life of the process and drives it:
//! gazetteer → seed history → restore previous window → poll loop.
//! Sinks are called in registration order after every cycle; a failing sink
//! is logged and skipped.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::clock::Clock;
use crate::core::engine::{Engine, EngineEvent};
use crate::core::export::{deliver, FileExporter, WindowSink};
use crate::core::feed::AlertFeed;
use crate::core::gazetteer::{Gazetteer, LocationResolver};
use crate::error::{ExportError, SupervisorError};
use crate::types::TestRejection;

pub type SharedEngine = Arc<RwLock<Engine>>;

/// A queued test trigger with its reply channel
#[derive(Debug)]
pub struct TestRequest {
    pub reply: oneshot::Sender<Result<(), TestRejection>>,
}

/// Cloneable handle for requesting a test window from outside the loop
#[derive(Debug, Clone)]
pub struct TestTrigger {
    tx: mpsc::Sender<TestRequest>,
}

impl TestTrigger {
    pub fn new(tx: mpsc::Sender<TestRequest>) -> Self {
        Self { tx }
    }

    /// Queue a test and wait for the loop's answer. `None` when the loop is gone.
    pub async fn trigger(&self) -> Option<Result<(), TestRejection>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(TestRequest { reply }).await.ok()?;
        rx.await.ok()
    }
}

pub struct Supervisor {
    cfg: AppConfig,
    feed: Arc<dyn AlertFeed>,
    clock: Arc<dyn Clock>,
    sinks: Vec<Arc<dyn WindowSink>>,
    exporter: Option<Arc<FileExporter>>,
    engine: Option<SharedEngine>,
    test_tx: mpsc::Sender<TestRequest>,
    test_rx: Option<mpsc::Receiver<TestRequest>>,
    shutdown: CancellationToken,
}

impl Supervisor {
    /// File export is registered first when `save_files` is set
    pub fn new(cfg: AppConfig, feed: Arc<dyn AlertFeed>, clock: Arc<dyn Clock>) -> Self {
        let (test_tx, test_rx) = mpsc::channel(8);
        let mut sinks: Vec<Arc<dyn WindowSink>> = Vec::new();
        let exporter = cfg.save_files.then(|| {
            let exporter = Arc::new(FileExporter::new(&cfg.output_dir, &cfg.sensor_name));
            sinks.push(exporter.clone());
            exporter
        });

        Self {
            cfg,
            feed,
            clock,
            sinks,
            exporter,
            engine: None,
            test_tx,
            test_rx: Some(test_rx),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn add_sink(&mut self, sink: Arc<dyn WindowSink>) {
        self.sinks.push(sink);
    }

    pub fn test_trigger(&self) -> TestTrigger {
        TestTrigger::new(self.test_tx.clone())
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn engine(&self) -> Option<SharedEngine> {
        self.engine.clone()
    }

    /// Create the engine. Only one engine may exist per supervisor.
    pub fn init_engine(&mut self, resolver: Arc<dyn LocationResolver>) -> Result<SharedEngine, SupervisorError> {
        if self.engine.is_some() {
            return Err(SupervisorError::AlreadyInitialized);
        }
        let engine = Arc::new(RwLock::new(Engine::new(
            self.cfg.clone(),
            resolver,
            self.clock.clone(),
        )));
        self.engine = Some(engine.clone());
        Ok(engine)
    }

    /// Startup sequence. A gazetteer failure is fatal; everything else degrades.
    pub async fn start(&mut self) -> Result<SharedEngine, SupervisorError> {
        let gazetteer = Gazetteer::load(Path::new(&self.cfg.gazetteer_path), self.feed.as_ref()).await?;
        let engine = self.init_engine(Arc::new(gazetteer))?;

        match self.feed.fetch_history().await {
            Ok(records) => {
                engine.write().await.seed_history(&records);
            }
            Err(e) => tracing::warn!(error = %e, "history feed unavailable, starting with empty history"),
        }

        if let Some(exporter) = &self.exporter {
            match exporter.load_state() {
                Ok(Some(state)) => engine.write().await.restore_previous(&state),
                Ok(None) => tracing::debug!("no state backup found"),
                Err(e) => tracing::warn!(error = %e, "state backup unreadable, ignored"),
            }
            if let Err(e) = exporter.ensure_csv_header() {
                tracing::error!(error = %e, "cannot prepare csv history");
            }
        }

        let initial = {
            let engine = engine.read().await;
            vec![
                EngineEvent::HistoryRefreshed(engine.history_view()),
                EngineEvent::WindowUpdated(Box::new(engine.snapshot())),
            ]
        };
        self.dispatch(&initial).await;

        tracing::info!(
            poll_secs = self.cfg.poll_interval_secs,
            sinks = self.sinks.len(),
            watched = self.cfg.watched_locations.len(),
            "supervisor started"
        );
        Ok(engine)
    }

    fn shared(&self) -> Result<&SharedEngine, SupervisorError> {
        self.engine.as_ref().ok_or(SupervisorError::NotInitialized)
    }

    /// One poll: fetch, fold, prune, dispatch
    pub async fn run_cycle(&self) -> Result<Vec<EngineEvent>, SupervisorError> {
        let engine = self.shared()?;
        let poll = self.feed.fetch_live().await;
        let events = {
            let mut engine = engine.write().await;
            let events = engine.process_poll(poll);
            engine.maintain();
            events
        };
        self.dispatch(&events).await;
        Ok(events)
    }

    pub async fn handle_test(&self, request: TestRequest) -> Result<(), SupervisorError> {
        let engine = self.shared()?;
        let result = engine.write().await.trigger_test();
        let reply = match result {
            Ok(events) => {
                self.dispatch(&events).await;
                Ok(())
            }
            Err(rejection) => {
                tracing::warn!(reason = %rejection, "test trigger rejected");
                Err(rejection)
            }
        };
        // Requester may have given up
        let _ = request.reply.send(reply);
        Ok(())
    }

    /// Poll until cancelled or Ctrl-C, then flush the terminate events
    pub async fn run(&mut self) -> Result<(), SupervisorError> {
        self.shared()?;
        let mut test_rx = self.test_rx.take().ok_or(SupervisorError::AlreadyRunning)?;

        let mut ticker = tokio::time::interval(self.cfg.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("shutdown requested");
                    break;
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("ctrl-c received");
                    break;
                }
                Some(request) = test_rx.recv() => {
                    self.handle_test(request).await?;
                }
                _ = ticker.tick() => {
                    self.run_cycle().await?;
                }
            }
        }

        let events = self.shared()?.write().await.terminate();
        self.dispatch(&events).await;
        tracing::info!("supervisor stopped");
        Ok(())
    }

    pub async fn dispatch(&self, events: &[EngineEvent]) {
        for event in events {
            for sink in &self.sinks {
                match deliver(sink.as_ref(), event).await {
                    Ok(()) | Err(ExportError::Disabled) => {}
                    Err(e) => tracing::error!(sink = sink.name(), error = %e, "sink failed"),
                }
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::api::{ApiSink, LiveMessage};
    use crate::core::clock::ManualClock;
    use crate::core::feed::StaticFeed;
    use crate::types::{FeedPoll, RawSnapshot, WindowState};
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn cfg(dir: &TempDir) -> AppConfig {
        AppConfig {
            output_dir: dir.path().join("www"),
            gazetteer_path: dir.path().join("lamas.json"),
            ..AppConfig::default()
        }
    }

    fn gazetteer_doc() -> String {
        r#"{"areas": {"עוטף עזה": {"שדרות": {"lat": 31.52, "long": 34.59}}}}"#.to_string()
    }

    fn supervisor(dir: &TempDir, polls: Vec<FeedPoll>) -> (Supervisor, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 6, 13, 3, 0, 0).unwrap());
        let mut feed = StaticFeed::with_polls(polls);
        feed.gazetteer = Some(gazetteer_doc());
        let sup = Supervisor::new(cfg(dir), Arc::new(feed), Arc::new(clock.clone()));
        (sup, clock)
    }

    #[tokio::test]
    async fn test_init_engine_only_once() {
        let dir = TempDir::new().unwrap();
        let (mut sup, _) = supervisor(&dir, vec![]);
        sup.init_engine(Arc::new(Gazetteer::new())).unwrap();
        let err = sup.init_engine(Arc::new(Gazetteer::new())).unwrap_err();
        assert!(matches!(err, SupervisorError::AlreadyInitialized));
        assert_eq!(err.to_string(), "this supervisor already owns an engine");

        // The guard is per supervisor
        let (mut other, _) = supervisor(&dir, vec![]);
        assert!(other.init_engine(Arc::new(Gazetteer::new())).is_ok());
    }

    #[tokio::test]
    async fn test_cycle_requires_engine() {
        let dir = TempDir::new().unwrap();
        let (sup, _) = supervisor(&dir, vec![]);
        assert!(matches!(sup.run_cycle().await, Err(SupervisorError::NotInitialized)));
    }

    #[tokio::test]
    async fn test_start_downloads_gazetteer_and_writes_files() {
        let dir = TempDir::new().unwrap();
        let poll = FeedPoll::Active(RawSnapshot::new(
            "100",
            1,
            "ירי רקטות וטילים",
            "",
            vec!["שדרות".to_string()],
        ));
        let (mut sup, _) = supervisor(&dir, vec![poll]);

        let engine = sup.start().await.unwrap();
        // Remote document cached locally
        assert!(dir.path().join("lamas.json").exists());

        sup.run_cycle().await.unwrap();
        assert_eq!(engine.read().await.state(), WindowState::Active);

        let www = dir.path().join("www");
        assert!(www.join("red_alert_history.json").exists());
        assert!(www.join("red_alert_latest.geojson").exists());
        assert!(www.join("red_alert_history.csv").exists());
    }

    #[tokio::test]
    async fn test_start_fails_without_gazetteer() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new(Utc::now());
        let mut sup = Supervisor::new(cfg(&dir), Arc::new(StaticFeed::default()), Arc::new(clock));
        assert!(matches!(sup.start().await, Err(SupervisorError::Gazetteer(_))));
    }

    #[tokio::test]
    async fn test_trigger_replies_through_channel() {
        let dir = TempDir::new().unwrap();
        let (mut sup, _) = supervisor(&dir, vec![]);
        sup.start().await.unwrap();

        let (reply, rx) = oneshot::channel();
        sup.handle_test(TestRequest { reply }).await.unwrap();
        assert_eq!(rx.await.unwrap(), Ok(()));

        let (reply, rx) = oneshot::channel();
        sup.handle_test(TestRequest { reply }).await.unwrap();
        assert_eq!(rx.await.unwrap(), Err(TestRejection::TestAlreadyRunning));
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel_and_terminates() {
        let dir = TempDir::new().unwrap();
        let poll = FeedPoll::Active(RawSnapshot::new(
            "100",
            1,
            "ירי רקטות וטילים",
            "",
            vec!["שדרות".to_string()],
        ));
        let (mut sup, _) = supervisor(&dir, vec![poll]);
        let api = ApiSink::new(16);
        let mut live = api.sender().subscribe();
        sup.add_sink(Arc::new(api));
        sup.start().await.unwrap();

        // Shut down in the middle of an alert
        sup.run_cycle().await.unwrap();
        let latest = dir.path().join("www/red_alert_latest.geojson");
        let map: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&latest).unwrap()).unwrap();
        assert_eq!(map["features"].as_array().unwrap().len(), 1);

        let token = sup.shutdown_token();
        token.cancel();
        sup.run().await.unwrap();

        let map: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&latest).unwrap()).unwrap();
        assert!(map["features"].as_array().unwrap().is_empty());

        let mut last = None;
        while let Ok(message) = live.try_recv() {
            last = Some(message);
        }
        assert!(matches!(last, Some(LiveMessage::Terminated(_))));
        // The receiver is consumed by the first run
        assert!(matches!(sup.run().await, Err(SupervisorError::AlreadyRunning)));
    }
}
