//! Window renderer
//!
//! Pure projection of an `AlertWindow` into the text forms downstream
//! consumers publish. Areas, locations and titles are always emitted in
//! lexicographic order so equal windows render byte-identically.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use crate::config::AppConfig;
use crate::core::canonical::extract_duration;
use crate::types::{
    category_style, AlertWindow, CategoryStyle, PreviousWindow, RenderedWindow, WindowState,
    SPECIAL_UPDATE_STYLE,
};
use crate::{
    DEFAULT_ATTR_MAX_LEN, DEFAULT_MESSAGE_MAX_LEN, DEFAULT_STATUS_MAX_LEN, NO_ALERTS_TITLE,
    ROUTINE_DESCRIPTION, SPECIAL_UPDATE_EXACT, SPECIAL_UPDATE_MARKERS, UNKNOWN_AREA,
};

const ELLIPSIS: char = '…';
const GROUP_EMOJI: &str = "🚨";

/// Character ceilings for rendered fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderLimits {
    pub status_max_len: usize,
    pub attr_max_len: usize,
    pub message_max_len: usize,
}

impl Default for RenderLimits {
    fn default() -> Self {
        Self {
            status_max_len: DEFAULT_STATUS_MAX_LEN,
            attr_max_len: DEFAULT_ATTR_MAX_LEN,
            message_max_len: DEFAULT_MESSAGE_MAX_LEN,
        }
    }
}

impl From<&AppConfig> for RenderLimits {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            status_max_len: cfg.status_max_len,
            attr_max_len: cfg.attr_max_len,
            message_max_len: cfg.message_max_len,
        }
    }
}

/// Pre-alerts and "update" notices get their own style
pub fn is_special_update(title: &str) -> bool {
    title == SPECIAL_UPDATE_EXACT || SPECIAL_UPDATE_MARKERS.iter().any(|m| title.contains(m))
}

/// Replacement text for a field that would exceed its ceiling
pub fn overflow_text(location_count: usize, areas_summary: &str) -> String {
    format!("מתקפה מורחבת על {} ערים באזורים הבאים: {}", location_count, areas_summary)
}

#[derive(Debug, Clone, Default)]
pub struct WindowRenderer {
    limits: RenderLimits,
}

impl WindowRenderer {
    pub fn new(limits: RenderLimits) -> Self {
        Self { limits }
    }

    /// Render the current window. An empty window renders as idle.
    pub fn render(
        &self,
        window: &AlertWindow,
        previous: Option<&PreviousWindow>,
        now: DateTime<Utc>,
    ) -> RenderedWindow {
        let Some(latest) = window.latest.as_ref().filter(|_| !window.is_empty()) else {
            return self.render_idle(previous, now);
        };

        let title = latest.title.as_str();
        let description = latest.description.as_str();
        let special_update = is_special_update(title);
        let style = if special_update {
            SPECIAL_UPDATE_STYLE
        } else {
            category_style(latest.category)
        };

        let mut by_area: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for loc in window.locations.values() {
            by_area
                .entry(loc.area.as_str())
                .or_default()
                .insert(loc.display_name.as_str());
        }
        let areas: Vec<String> = by_area.keys().map(|a| a.to_string()).collect();
        let locations: Vec<String> = window
            .locations
            .values()
            .map(|l| l.display_name.as_str())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(str::to_string)
            .collect();
        let location_count = locations.len();

        let areas_summary = if areas.is_empty() {
            UNKNOWN_AREA.to_string()
        } else {
            areas.join(", ")
        };
        let locations_summary = locations.join(", ");

        let area_lines: Vec<String> = by_area
            .iter()
            .map(|(area, names)| {
                format!("{}: {}", area, names.iter().copied().collect::<Vec<_>>().join(", "))
            })
            .collect();
        let full_message = format!("{}\n * {}", title, area_lines.join("\n * "));
        let alert_text = area_lines.join(" * ");

        let (whatsapp, telegram) = grouped_messages(window, title, description, style);

        let cap = |text: String, max: usize| {
            if text.chars().count() > max {
                overflow_text(location_count, &areas_summary)
            } else {
                text
            }
        };
        let status_line = status_line(title, &areas_summary, &locations_summary, self.limits.status_max_len);

        RenderedWindow {
            state: WindowState::Active,
            id: latest.id.clone(),
            category: latest.category,
            title: title.to_string(),
            description: description.to_string(),
            icon: style.icon.to_string(),
            emoji: style.emoji.to_string(),
            full_message: cap(full_message, self.limits.attr_max_len),
            locations_summary: cap(locations_summary.clone(), self.limits.attr_max_len),
            whatsapp_message: cap(whatsapp, self.limits.message_max_len),
            telegram_message: cap(telegram, self.limits.message_max_len),
            alert_text: cap(alert_text, self.limits.attr_max_len),
            status_line,
            areas,
            locations,
            areas_summary,
            duration_secs: extract_duration(description),
            sequence_count: window.sequence_count,
            location_count,
            special_update,
            is_test: window.is_test,
            last_changed: window.last_activity.unwrap_or(now),
            previous: previous.cloned(),
        }
    }

    /// The "nothing is happening" projection, carrying the last window as baseline
    pub fn render_idle(&self, previous: Option<&PreviousWindow>, now: DateTime<Utc>) -> RenderedWindow {
        let style = category_style(0);
        RenderedWindow {
            state: WindowState::Idle,
            id: String::new(),
            category: 0,
            title: NO_ALERTS_TITLE.to_string(),
            description: ROUTINE_DESCRIPTION.to_string(),
            icon: style.icon.to_string(),
            emoji: style.emoji.to_string(),
            areas: Vec::new(),
            locations: Vec::new(),
            areas_summary: String::new(),
            locations_summary: String::new(),
            status_line: truncate(NO_ALERTS_TITLE, self.limits.status_max_len),
            full_message: NO_ALERTS_TITLE.to_string(),
            alert_text: NO_ALERTS_TITLE.to_string(),
            whatsapp_message: format!("{} *{}*\n_{}_", style.emoji, NO_ALERTS_TITLE, ROUTINE_DESCRIPTION),
            telegram_message: format!("{} **{}**\n__{}__", style.emoji, NO_ALERTS_TITLE, ROUTINE_DESCRIPTION),
            duration_secs: 0,
            sequence_count: 0,
            location_count: 0,
            special_update: false,
            is_test: false,
            last_changed: now,
            previous: previous.cloned(),
        }
    }
}

/// "title - areas: locations", then "areas: locations", then hard truncation
pub fn status_line(title: &str, areas: &str, locations: &str, max_len: usize) -> String {
    let full = format!("{} - {}: {}", title, areas, locations);
    if full.chars().count() <= max_len {
        return full;
    }
    let short = format!("{}: {}", areas, locations);
    truncate(&short, max_len)
}

/// At most `max_len` characters; cut text ends with an ellipsis
fn truncate(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_len.saturating_sub(1)).collect();
    out.push(ELLIPSIS);
    out
}

/// WhatsApp (`*`/`_`) and Telegram (`**`/`__`) messages grouped by title then area
fn grouped_messages(
    window: &AlertWindow,
    title: &str,
    description: &str,
    style: CategoryStyle,
) -> (String, String) {
    let mut wa = Vec::new();
    let mut tg = Vec::new();
    let titles = window.grouped.len();

    match titles {
        0 => {
            wa.push(format!("{} *{}*", style.emoji, title));
            tg.push(format!("{} **{}**", style.emoji, title));
        }
        1 => {
            let only = window.grouped.keys().next().map(String::as_str).unwrap_or(title);
            wa.push(format!("{} *{}*", style.emoji, only));
            tg.push(format!("{} **{}**", style.emoji, only));
        }
        n => {
            wa.push(format!("{} *התרעות פעילות ({} סוגים)*", style.emoji, n));
            tg.push(format!("{} **התרעות פעילות ({} סוגים)**", style.emoji, n));
        }
    }

    for (group_title, areas) in &window.grouped {
        if titles > 1 {
            wa.push(format!("\n{} *{}*", GROUP_EMOJI, group_title));
            tg.push(format!("\n{} **{}**", GROUP_EMOJI, group_title));
        }
        for (area, names) in areas {
            if names.is_empty() {
                continue;
            }
            let names = names.iter().map(String::as_str).collect::<Vec<_>>().join(", ");
            wa.push(format!("> {}\n{}", area, names));
            tg.push(format!("**__{}__** — {}", area, names));
        }
    }

    if !description.is_empty() {
        wa.push(format!("\n_{}_", description));
        tg.push(format!("\n__{}__", description));
    }
    (wa.join("\n"), tg.join("\n"))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CanonicalLocation, RawSnapshot};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 13, 3, 0, 0).unwrap()
    }

    fn window(title: &str, desc: &str, locs: &[(&str, &str)]) -> AlertWindow {
        let mut w = AlertWindow::default();
        for (name, area) in locs {
            w.locations.insert(
                name.to_string(),
                CanonicalLocation {
                    key: name.to_string(),
                    display_name: name.to_string(),
                    area: area.to_string(),
                    coordinates: None,
                },
            );
            w.grouped
                .entry(title.to_string())
                .or_default()
                .entry(area.to_string())
                .or_default()
                .insert(name.to_string());
        }
        w.sequence_count = 1;
        w.latest = Some(RawSnapshot::new(
            "1",
            1,
            title,
            desc,
            locs.iter().map(|(n, _)| n.to_string()).collect(),
        ));
        w.last_activity = Some(now());
        w
    }

    #[test]
    fn test_deterministic_ordering() {
        let w = window(
            "Rockets",
            "",
            &[("Alpha", "South"), ("Gimel", "North"), ("Bet", "South")],
        );
        let r = WindowRenderer::default().render(&w, None, now());

        assert_eq!(r.areas, vec!["North", "South"]);
        assert_eq!(r.locations, vec!["Alpha", "Bet", "Gimel"]);
        assert_eq!(r.areas_summary, "North, South");
        assert_eq!(r.status_line, "Rockets - North, South: Alpha, Bet, Gimel");
        assert_eq!(r.full_message, "Rockets\n * North: Gimel\n * South: Alpha, Bet");
        assert_eq!(r.alert_text, "North: Gimel * South: Alpha, Bet");
        assert_eq!(r.whatsapp_message, "🚀 *Rockets*\n> North\nGimel\n> South\nAlpha, Bet");
        assert_eq!(
            r.telegram_message,
            "🚀 **Rockets**\n**__North__** — Gimel\n**__South__** — Alpha, Bet"
        );
        assert_eq!(r.location_count, 3);
        assert_eq!(r.state, WindowState::Active);
    }

    #[test]
    fn test_multiple_titles_grouped() {
        let mut w = window("Rockets", "Go inside", &[("Alpha", "South")]);
        w.grouped
            .entry("Aircraft".to_string())
            .or_default()
            .entry("North".to_string())
            .or_default()
            .insert("Gimel".to_string());

        let r = WindowRenderer::default().render(&w, None, now());
        assert_eq!(
            r.whatsapp_message,
            "🚀 *התרעות פעילות (2 סוגים)*\n\n🚨 *Aircraft*\n> North\nGimel\n\n🚨 *Rockets*\n> South\nAlpha\n\n_Go inside_"
        );
        assert!(r.telegram_message.ends_with("\n\n__Go inside__"));
    }

    #[test]
    fn test_status_line_falls_back_to_short_form() {
        let names: Vec<String> = (0..50).map(|i| format!("Loc{:02}", i)).collect();
        let locations = names.join(", ");
        assert!(format!("T - A: {}", locations).chars().count() > 255);

        // Title is what pushes it over: short form fits
        let title = "x".repeat(200);
        let short_locs = names[..10].join(", ");
        let line = status_line(&title, "A", &short_locs, 255);
        assert_eq!(line, format!("A: {}", short_locs));

        // Still too long: hard truncation with marker
        let line = status_line("T", "A", &locations, 255);
        assert_eq!(line.chars().count(), 255);
        assert!(line.starts_with("A: Loc00, Loc01"));
        assert!(line.ends_with('…'));
    }

    #[test]
    fn test_oversized_fields_collapse_to_overflow_sentence() {
        let locs: Vec<(String, String)> = (0..60)
            .map(|i| (format!("Location number {:02}", i), if i % 2 == 0 { "South" } else { "North" }.to_string()))
            .collect();
        let refs: Vec<(&str, &str)> = locs.iter().map(|(n, a)| (n.as_str(), a.as_str())).collect();
        let w = window("Rockets", "", &refs);

        let r = WindowRenderer::default().render(&w, None, now());
        let overflow = overflow_text(60, "North, South");
        assert_eq!(r.whatsapp_message, overflow);
        assert_eq!(r.telegram_message, overflow);
        // Attribute ceiling not reached
        assert!(r.full_message.starts_with("Rockets\n * North: "));

        let tight = WindowRenderer::new(RenderLimits {
            status_max_len: 255,
            attr_max_len: 300,
            message_max_len: 700,
        });
        let r = tight.render(&w, None, now());
        assert_eq!(r.full_message, overflow);
        assert_eq!(r.locations_summary, overflow);
        assert_eq!(r.locations.len(), 60);
    }

    #[test]
    fn test_special_update_style() {
        let w = window("בדקות הקרובות צפויות להתקבל התרעות באזורך", "", &[("Alpha", "South")]);
        let r = WindowRenderer::default().render(&w, None, now());
        assert!(r.special_update);
        assert_eq!(r.icon, "mdi:Alarm-Light-Outline");
        assert_eq!(r.emoji, "🔜");

        assert!(is_special_update("שהייה בסמיכות למרחב מוגן"));
        assert!(is_special_update("עדכון"));
        assert!(!is_special_update("ירי רקטות וטילים"));
    }

    #[test]
    fn test_duration_from_description() {
        let w = window("Rockets", "שהו במרחב המוגן 10 דקות", &[("Alpha", "South")]);
        assert_eq!(WindowRenderer::default().render(&w, None, now()).duration_secs, 600);
    }

    #[test]
    fn test_idle_projection_carries_previous() {
        let w = window("Rockets", "", &[("Alpha", "South")]);
        let renderer = WindowRenderer::default();
        let last = renderer.render(&w, None, now());
        let previous = PreviousWindow::from(&last);

        let idle = renderer.render(&AlertWindow::default(), Some(&previous), now());
        assert_eq!(idle.state, WindowState::Idle);
        assert_eq!(idle.title, NO_ALERTS_TITLE);
        assert_eq!(idle.previous.as_ref().unwrap().status_line, last.status_line);
    }
}
