//! Outcome codes for snapshot folding and test triggers

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What the window machine did with a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FoldOutcome {
    /// Idle → Active, snapshot folded as the first of a new window
    Opened,
    /// Active → Active, snapshot folded
    Folded,
    /// Same content as the previous fold; only the idle timer was refreshed
    Duplicate,
    /// Every location was a drill marker; no transition
    Discarded,
}

impl FoldOutcome {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Opened => "W001_OPENED",
            Self::Folded => "W002_FOLDED",
            Self::Duplicate => "W003_DUPLICATE",
            Self::Discarded => "W004_DISCARDED",
        }
    }

    /// Whether the window content changed and should be re-rendered
    pub fn changed(&self) -> bool {
        matches!(self, Self::Opened | Self::Folded)
    }
}

/// Why a manual test trigger was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestRejection {
    #[error("a real alert window is active")]
    RealWindowActive,
    #[error("a test window is already running")]
    TestAlreadyRunning,
}
