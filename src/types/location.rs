//! Resolved locations

use serde::{Deserialize, Serialize};

use crate::UNKNOWN_AREA;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

/// A location after canonicalization and gazetteer lookup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalLocation {
    /// Canonical key used for set membership and lookup
    pub key: String,
    /// Best-known original spelling
    pub display_name: String,
    pub area: String,
    pub coordinates: Option<Coordinates>,
}

impl CanonicalLocation {
    /// Fallback for names the gazetteer does not know
    pub fn unknown(key: impl Into<String>, raw: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            display_name: raw.into(),
            area: UNKNOWN_AREA.to_string(),
            coordinates: None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.area == UNKNOWN_AREA && self.coordinates.is_none()
    }
}
