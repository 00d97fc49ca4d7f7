//! Alert window state machine
//!
//! State transitions:
//! - IDLE → ACTIVE: snapshot with at least one non-drill location
//! - ACTIVE → ACTIVE: fold (or absorb a redelivery of the last fold)
//! - ACTIVE → IDLE: idle timeout elapsed AND at least one idle-confirming poll
//!
//! A running test window additionally holds the window open until the test
//! duration has elapsed.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};

use crate::core::canonical::{canonicalize, is_forbidden};
use crate::core::gazetteer::{resolve_or_unknown, LocationResolver};
use crate::types::{
    AlertWindow, CanonicalLocation, ClosedWindow, DedupKey, FoldOutcome, RawSnapshot,
    TestRejection, WindowState,
};

/// Result of offering one snapshot to the machine
#[derive(Debug, Clone)]
pub struct Fold {
    pub outcome: FoldOutcome,
    /// This snapshot's resolved locations, one per canonical key.
    /// Empty unless the window changed.
    pub observed: Vec<CanonicalLocation>,
}

impl Fold {
    fn unchanged(outcome: FoldOutcome) -> Self {
        Self {
            outcome,
            observed: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub struct AlertWindowMachine {
    state: WindowState,
    window: AlertWindow,
    /// Content of the last fold
    last_key: Option<DedupKey>,
    /// Idle-confirming polls since the last activity
    idle_polls: u32,
    /// Fingerprint of the last window handed to persistence
    last_saved: Option<String>,
    test_until: Option<DateTime<Utc>>,
    idle_timeout: Duration,
}

impl AlertWindowMachine {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            state: WindowState::Idle,
            window: AlertWindow::default(),
            last_key: None,
            idle_polls: 0,
            last_saved: None,
            test_until: None,
            idle_timeout,
        }
    }

    /// Offer a snapshot. Drill locations are filtered first; a snapshot left
    /// with no locations is discarded without any transition.
    pub fn fold(
        &mut self,
        snapshot: &RawSnapshot,
        resolver: &dyn LocationResolver,
        now: DateTime<Utc>,
        is_test: bool,
    ) -> Fold {
        let observed = resolve_locations(snapshot, resolver);
        if observed.is_empty() {
            tracing::debug!(alert_id = %snapshot.id, "snapshot has only drill/test locations, discarded");
            return Fold::unchanged(FoldOutcome::Discarded);
        }

        if !is_test && self.test_until.is_some() {
            tracing::info!("real alert during test window, test cancelled");
            self.test_until = None;
        }
        if !is_test {
            self.window.is_test = false;
        }

        let key = DedupKey::new(snapshot, observed.iter().map(|l| l.key.as_str()));
        let opened = self.state == WindowState::Idle;
        if opened {
            self.open(now, is_test);
        } else if self.last_key.as_ref() == Some(&key) {
            self.window.last_activity = Some(now);
            self.idle_polls = 0;
            return Fold::unchanged(FoldOutcome::Duplicate);
        }

        self.idle_polls = 0;
        self.window.sequence_count += 1;
        for loc in &observed {
            let stored = self
                .window
                .locations
                .entry(loc.key.clone())
                .or_insert_with(|| loc.clone());
            self.window
                .grouped
                .entry(snapshot.title.clone())
                .or_default()
                .entry(stored.area.clone())
                .or_default()
                .insert(stored.display_name.clone());
        }
        self.window.latest = Some(snapshot.clone());
        self.window.last_activity = Some(now);
        self.last_key = Some(key);

        let outcome = if opened {
            FoldOutcome::Opened
        } else {
            FoldOutcome::Folded
        };
        tracing::debug!(
            alert_id = %snapshot.id,
            outcome = outcome.code(),
            sequence = self.window.sequence_count,
            accumulated = self.window.locations.len(),
            "snapshot folded"
        );
        Fold { outcome, observed }
    }

    fn open(&mut self, now: DateTime<Utc>, is_test: bool) {
        self.state = WindowState::Active;
        self.window = AlertWindow {
            started_at: Some(now),
            is_test,
            ..AlertWindow::default()
        };
        self.last_key = None;
        self.window.sentinel_cleared = true;
        self.last_saved = None;
        self.idle_polls = 0;
    }

    /// Record a poll that carried no alert. Returns true when the window
    /// should now close.
    pub fn observe_quiet_poll(&mut self, confirms_idle: bool, now: DateTime<Utc>) -> bool {
        if self.state == WindowState::Idle {
            return false;
        }
        if confirms_idle {
            self.idle_polls += 1;
        }

        if let Some(until) = self.test_until {
            if now < until {
                return false;
            }
            tracing::info!("test window duration elapsed");
            self.test_until = None;
        }

        let Some(last) = self.window.last_activity else {
            return false;
        };
        now - last > self.idle_timeout && self.idle_polls > 0
    }

    /// Arm a test window ending at `until`
    pub fn start_test(&mut self, until: DateTime<Utc>) -> Result<(), TestRejection> {
        if self.test_until.is_some() {
            return Err(TestRejection::TestAlreadyRunning);
        }
        if self.state.is_active() && !self.window.is_test {
            return Err(TestRejection::RealWindowActive);
        }
        self.test_until = Some(until);
        Ok(())
    }

    pub fn abort_test(&mut self) {
        self.test_until = None;
    }

    /// Active → Idle. Returns the record for persistence unless this exact
    /// window was already handed over.
    pub fn close(&mut self, closed: ClosedWindow) -> Option<ClosedWindow> {
        let fingerprint = closed.fingerprint();
        let emit = self.last_saved.as_deref() != Some(fingerprint.as_str());
        self.last_saved = Some(fingerprint);

        self.state = WindowState::Idle;
        self.window = AlertWindow::default();
        self.last_key = None;
        self.idle_polls = 0;
        self.test_until = None;

        if !emit {
            tracing::debug!(alert_id = %closed.id, "closed window already saved, not re-emitted");
        }
        emit.then_some(closed)
    }

    pub fn state(&self) -> WindowState {
        self.state
    }

    pub fn window(&self) -> &AlertWindow {
        &self.window
    }

    pub fn idle_polls(&self) -> u32 {
        self.idle_polls
    }

    pub fn test_running(&self) -> bool {
        self.test_until.is_some()
    }

    pub fn last_key(&self) -> Option<&DedupKey> {
        self.last_key.as_ref()
    }
}

/// Drop drill markers, canonicalize, resolve; first spelling of a key wins
fn resolve_locations(snapshot: &RawSnapshot, resolver: &dyn LocationResolver) -> Vec<CanonicalLocation> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(snapshot.locations.len());
    for raw in snapshot.locations.iter().filter(|l| !is_forbidden(l)) {
        let key = canonicalize(raw);
        if key.is_empty() || !seen.insert(key.clone()) {
            continue;
        }
        out.push(resolve_or_unknown(resolver, &key, raw));
    }
    out
}

// =============================================================================
// TESTS
// =============================================================================
