//! Name canonicalizer
//!
//! Maps spelling variants of one place ("כפר סבא", "כפר  סבא ", "(כפר סבא)")
//! onto a single key used for set membership and gazetteer lookup.

use lazy_static::lazy_static;
use regex::Regex;

use crate::{APOSTROPHE_NAMES, FORBIDDEN_MARKERS};

lazy_static! {
    static ref RE_PUNCTUATION: Regex = Regex::new(r#"[()'"]+"#).unwrap();
    static ref RE_WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
    // "למשך 10 דקות" / "דקה אחת" style shelter durations
    static ref RE_DURATION: Regex = Regex::new(r"(\d+)\s+(דקות|דקה)").unwrap();
}

/// Canonical key for a raw location name. Empty input gives an empty key.
pub fn canonicalize(raw: &str) -> String {
    let trimmed = raw.trim();
    if APOSTROPHE_NAMES.contains(&trimmed) {
        return trimmed.to_string();
    }
    let stripped = RE_PUNCTUATION.replace_all(trimmed, "");
    RE_WHITESPACE.replace_all(stripped.trim(), " ").into_owned()
}

/// Drill/test locations never enter a window
pub fn is_forbidden(raw: &str) -> bool {
    FORBIDDEN_MARKERS.iter().any(|m| raw.contains(m))
}

/// Shelter duration in seconds from a description, 0 if none is stated
pub fn extract_duration(description: &str) -> u64 {
    RE_DURATION
        .captures(description)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u64>().ok())
        .map(|minutes| minutes.saturating_mul(60))
        .unwrap_or(0)
}
