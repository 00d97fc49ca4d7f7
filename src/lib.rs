//! RedAlert: alert window and history consolidation for the Oref civil-defense feed
//!
//! Pipeline: feed poll → AlertWindowMachine → WindowRenderer / HistoryStore → sinks

pub mod config;
pub mod core;
pub mod error;
pub mod types;

// =============================================================================
// LOCATIONS
// =============================================================================

/// Area reported for locations the gazetteer does not know
pub const UNKNOWN_AREA: &str = "ישראל";

/// Substrings marking drill/test locations; such names never enter a window
pub const FORBIDDEN_MARKERS: [&str; 2] = ["בדיקה", "תרגיל"];

/// Names whose apostrophe is part of the spelling and must survive canonicalization
pub const APOSTROPHE_NAMES: [&str; 2] = ["ג'ת", "ח'וואלד"];

// =============================================================================
// TITLES & TEXT
// =============================================================================

/// Title used when a payload carries none
pub const DEFAULT_TITLE: &str = "התרעה";

/// Title of the idle projection
pub const NO_ALERTS_TITLE: &str = "אין התרעות";

/// Description of the idle projection
pub const ROUTINE_DESCRIPTION: &str = "שגרה";

/// Early-warning title and its short alias in grouped history
pub const PRE_ALERT_TITLE: &str = "בדקות הקרובות צפויות להתקבל התרעות באזורך";
pub const PRE_ALERT_ALIAS: &str = "התרעות מקדימות";

/// Title fragments that mark a projection as a pre-alert / update rather than a live alert
pub const SPECIAL_UPDATE_MARKERS: [&str; 2] = ["בדקות הקרובות", "עדכון"];
pub const SPECIAL_UPDATE_EXACT: &str = "שהייה בסמיכות למרחב מוגן";

// =============================================================================
// TEST INJECTION
// =============================================================================

pub const TEST_ALERT_CATEGORY: u8 = 1;
pub const TEST_ALERT_TITLE: &str = "ירי רקטות וטילים (התרעת בדיקה)";
pub const TEST_ALERT_DESCRIPTION: &str = "התרעת בדיקה - כנסו למרחב המוגן לזמן קצר לבדיקה";

/// Used when no watched locations are configured
pub const TEST_DEFAULT_LOCATION: &str = "תל אביב - מרכז העיר";

// =============================================================================
// DEFAULTS
// =============================================================================

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_TEST_DURATION_SECS: u64 = 120;
pub const DEFAULT_HISTORY_HOURS: u64 = 12;

/// Upper bounds; larger configured values fall back to the defaults
pub const MAX_POLL_INTERVAL_SECS: u64 = 3_600;
pub const MAX_WINDOW_DURATION_SECS: u64 = 86_400;
pub const MAX_HISTORY_HOURS: u64 = 168;
pub const MAX_MERGE_WINDOW_MINUTES: u64 = 1_440;

/// Used when a configured history horizon is invalid
pub const FALLBACK_HISTORY_HOURS: u64 = 4;

/// Per-location history merge window. Configurable; treat as a parameter.
pub const DEFAULT_MERGE_WINDOW_MINUTES: u64 = 10;

/// Status line ceiling (characters)
pub const DEFAULT_STATUS_MAX_LEN: usize = 255;

/// Attribute ceiling; longer projections collapse to the overflow sentence
pub const DEFAULT_ATTR_MAX_LEN: usize = 160_000;

/// Grouped message ceiling (characters)
pub const DEFAULT_MESSAGE_MAX_LEN: usize = 700;

pub const DEFAULT_SENSOR_NAME: &str = "red_alert";

// =============================================================================
// VERSION
// =============================================================================

pub const VERSION: &str = "1.0.0";
