//! Category → icon / emoji table

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CategoryStyle {
    pub icon: &'static str,
    pub emoji: &'static str,
}

const GENERIC: CategoryStyle = CategoryStyle { icon: "mdi:alert", emoji: "❗" };

/// Style for pre-alerts and update notices
pub const SPECIAL_UPDATE_STYLE: CategoryStyle = CategoryStyle {
    icon: "mdi:Alarm-Light-Outline",
    emoji: "🔜",
};

/// Style for history features
pub const HISTORY_STYLE: CategoryStyle = CategoryStyle {
    icon: "mdi:history",
    emoji: "📜",
};

pub fn category_style(category: u8) -> CategoryStyle {
    let (icon, emoji) = match category {
        1 => ("mdi:rocket-launch", "🚀"),
        2 => ("mdi:home-alert", "⚠️"),
        3 => ("mdi:earth-box", "🌍"),
        4 => ("mdi:chemical-weapon", "☢️"),
        5 => ("mdi:waves", "🌊"),
        6 => ("mdi:airplane", "🛩️"),
        7 => ("mdi:skull", "💀"),
        10 => ("mdi:Home-Alert", "⚠️"),
        13 => ("mdi:run-fast", "👹"),
        15 => ("mdi:alert-circle-Outline", "⭕"),
        _ => return GENERIC,
    };
    CategoryStyle { icon, emoji }
}
