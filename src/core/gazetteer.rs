//! Location gazetteer
//!
//! Document shape: `{"areas": {area: {location: {"lat": .., "long": ..}}}}`.
//! Locations are indexed by canonical key. A key present in several areas
//! resolves to the last one loaded.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde_json::Value;

use crate::core::canonical::canonicalize;
use crate::core::feed::{strip_bom, AlertFeed};
use crate::error::GazetteerError;
use crate::types::{CanonicalLocation, Coordinates};

/// Lookup from canonical key to resolved location
pub trait LocationResolver: Send + Sync {
    fn resolve(&self, key: &str) -> Option<CanonicalLocation>;
}

/// Resolve `key`, falling back to the unknown-area sentinel with `raw` as display name
pub fn resolve_or_unknown(resolver: &dyn LocationResolver, key: &str, raw: &str) -> CanonicalLocation {
    match resolver.resolve(key) {
        Some(loc) => loc,
        None => {
            tracing::debug!(location = %raw, "location not in gazetteer, using unknown area");
            CanonicalLocation::unknown(key, raw.trim())
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Gazetteer {
    entries: HashMap<String, CanonicalLocation>,
    areas: HashSet<String>,
}

impl Gazetteer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert; the name is canonicalized
    pub fn with_location(mut self, area: &str, name: &str, coordinates: Option<Coordinates>) -> Self {
        self.insert(area, name, coordinates);
        self
    }

    fn insert(&mut self, area: &str, name: &str, coordinates: Option<Coordinates>) {
        let key = canonicalize(name);
        if key.is_empty() {
            tracing::warn!(location = %name, area = %area, "location has empty canonical name, skipped");
            return;
        }
        self.areas.insert(area.to_string());
        let loc = CanonicalLocation {
            key: key.clone(),
            display_name: name.to_string(),
            area: area.to_string(),
            coordinates,
        };
        if let Some(prev) = self.entries.insert(key.clone(), loc) {
            tracing::warn!(
                key = %key,
                previous_area = %prev.area,
                area = %area,
                "duplicate canonical location, last one wins"
            );
        }
    }

    /// Parse a gazetteer document. Malformed individual entries are skipped;
    /// a name listed under several areas resolves to the last one in the document.
    pub fn from_json(text: &str) -> Result<Self, GazetteerError> {
        let doc: Value = serde_json::from_str(strip_bom(text))?;
        let areas = doc
            .get("areas")
            .and_then(Value::as_object)
            .ok_or(GazetteerError::MissingAreas)?;

        let mut gazetteer = Gazetteer::new();
        for (area, locations) in areas {
            let Some(locations) = locations.as_object() else {
                tracing::warn!(area = %area, "area is not an object, skipped");
                continue;
            };
            for (name, details) in locations {
                if !details.is_object() {
                    tracing::warn!(location = %name, area = %area, "location details are not an object, skipped");
                    continue;
                }
                gazetteer.insert(area, name, parse_coordinates(name, details));
            }
        }

        if gazetteer.is_empty() {
            return Err(GazetteerError::Empty);
        }
        Ok(gazetteer)
    }

    /// Read the local cache file
    pub fn load_local(path: &Path) -> Result<Self, GazetteerError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Local cache first, then download and refresh the cache.
    /// Fails only when neither source yields a usable gazetteer.
    pub async fn load(path: &Path, feed: &dyn AlertFeed) -> Result<Self, GazetteerError> {
        let local_err = match Self::load_local(path) {
            Ok(g) => {
                tracing::info!(path = %path.display(), locations = g.len(), areas = g.area_count(), "gazetteer loaded");
                return Ok(g);
            }
            Err(e) => e,
        };
        tracing::warn!(path = %path.display(), error = %local_err, "local gazetteer unusable, downloading");

        let remote = match feed.fetch_gazetteer().await {
            Ok(text) => Self::from_json(&text).map(|g| (g, text)).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        match remote {
            Ok((g, text)) => {
                if let Err(e) = write_cache(path, strip_bom(&text)) {
                    tracing::error!(path = %path.display(), error = %e, "failed to save gazetteer cache");
                }
                tracing::info!(locations = g.len(), areas = g.area_count(), "gazetteer downloaded");
                Ok(g)
            }
            Err(remote) => Err(GazetteerError::Unavailable {
                path: path.display().to_string(),
                local: local_err.to_string(),
                remote,
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn area_count(&self) -> usize {
        self.areas.len()
    }
}

impl LocationResolver for Gazetteer {
    fn resolve(&self, key: &str) -> Option<CanonicalLocation> {
        self.entries.get(key).cloned()
    }
}

/// Both coordinates or none; numbers or numeric strings
fn parse_coordinates(name: &str, details: &Value) -> Option<Coordinates> {
    let number = |v: &Value| match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    let lat = details.get("lat").filter(|v| !v.is_null());
    let lon = details.get("long").filter(|v| !v.is_null());
    match (lat, lon) {
        (Some(lat), Some(lon)) => match (number(lat), number(lon)) {
            (Some(lat), Some(lon)) => Some(Coordinates { lat, lon }),
            _ => {
                tracing::warn!(location = %name, "invalid coordinates, skipped");
                None
            }
        },
        (None, None) => None,
        _ => {
            tracing::debug!(location = %name, "partial coordinates, skipped");
            None
        }
    }
}

fn write_cache(path: &Path, text: &str) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let pretty = serde_json::from_str::<Value>(text)
        .and_then(|v| serde_json::to_string_pretty(&v))
        .unwrap_or_else(|_| text.to_string());
    std::fs::write(path, pretty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::feed::StaticFeed;
    use crate::UNKNOWN_AREA;

    const DOC: &str = r#"{
        "areas": {
            "עוטף עזה": {
                "שדרות": {"lat": 31.525, "long": 34.5955},
                "(נתיב העשרה)": {"lat": "31.5682", "long": "34.5425"}
            },
            "מערב לכיש": {
                "אשקלון - דרום": {"lat": 31.64, "long": 34.55},
                "זיקים": {"lat": 31.61}
            },
            "broken": 7
        }
    }"#;

    #[test]
    fn test_from_json_indexes_by_canonical_key() {
        let g = Gazetteer::from_json(DOC).unwrap();
        assert_eq!(g.len(), 4);
        assert_eq!(g.area_count(), 2);

        let loc = g.resolve("נתיב העשרה").unwrap();
        assert_eq!(loc.display_name, "(נתיב העשרה)");
        assert_eq!(loc.area, "עוטף עזה");
        assert_eq!(loc.coordinates, Some(Coordinates { lat: 31.5682, lon: 34.5425 }));

        // Partial coordinates are dropped, the location is kept
        assert_eq!(g.resolve("זיקים").unwrap().coordinates, None);
    }

    #[test]
    fn test_bom_and_missing_areas() {
        let with_bom = format!("\u{feff}{}", DOC);
        assert!(Gazetteer::from_json(&with_bom).is_ok());
        assert!(matches!(Gazetteer::from_json("{}"), Err(GazetteerError::MissingAreas)));
        assert!(matches!(Gazetteer::from_json(r#"{"areas": {}}"#), Err(GazetteerError::Empty)));
        assert!(matches!(Gazetteer::from_json("not json"), Err(GazetteerError::Parse(_))));
    }

    #[test]
    fn test_duplicate_across_areas_last_wins() {
        let g = Gazetteer::new()
            .with_location("צפון", "כפר ורדים", None)
            .with_location("גליל", "כפר ורדים", None);
        assert_eq!(g.len(), 1);
        assert_eq!(g.resolve("כפר ורדים").unwrap().area, "גליל");
    }

    #[test]
    fn test_duplicate_in_document_resolves_in_load_order() {
        let g = Gazetteer::from_json(r#"{"areas": {"Zeta": {"Dup": {}}, "Alpha": {"Dup": {}}}}"#).unwrap();
        assert_eq!(g.len(), 1);
        assert_eq!(g.resolve("Dup").unwrap().area, "Alpha");

        let g = Gazetteer::from_json(r#"{"areas": {"Alpha": {"Dup": {}}, "Zeta": {"Dup": {}}}}"#).unwrap();
        assert_eq!(g.resolve("Dup").unwrap().area, "Zeta");
    }

    #[test]
    fn test_resolve_or_unknown() {
        let g = Gazetteer::new().with_location("דרום", "באר שבע", None);
        assert_eq!(resolve_or_unknown(&g, "באר שבע", "באר שבע").area, "דרום");
        let unknown = resolve_or_unknown(&g, "מקום", " מקום ");
        assert_eq!(unknown.area, UNKNOWN_AREA);
        assert_eq!(unknown.display_name, "מקום");
        assert!(unknown.is_unknown());
    }

    #[tokio::test]
    async fn test_load_prefers_local_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lamas.json");
        std::fs::write(&path, DOC).unwrap();

        let feed = StaticFeed::default();
        let g = Gazetteer::load(&path, &feed).await.unwrap();
        assert_eq!(g.len(), 4);
    }

    #[tokio::test]
    async fn test_load_downloads_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("lamas.json");

        let feed = StaticFeed {
            gazetteer: Some(DOC.to_string()),
            ..Default::default()
        };
        let g = Gazetteer::load(&path, &feed).await.unwrap();
        assert_eq!(g.len(), 4);
        assert!(Gazetteer::load_local(&path).is_ok());
    }

    #[tokio::test]
    async fn test_load_fails_when_both_sources_fail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lamas.json");
        std::fs::write(&path, "{ broken").unwrap();

        let feed = StaticFeed::default();
        let err = Gazetteer::load(&path, &feed).await.unwrap_err();
        assert!(matches!(err, GazetteerError::Unavailable { .. }));
    }
}
