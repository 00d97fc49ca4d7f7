//! Plain data types shared by the engine, sinks and API

mod alert;
mod category;
mod history;
mod location;
mod outcome;
mod render;
mod window;

pub use alert::{FeedPoll, HistoryRecord, RawSnapshot};
pub use category::{category_style, CategoryStyle, HISTORY_STYLE, SPECIAL_UPDATE_STYLE};
pub use history::{GroupedHistory, GroupedLocation, HistoryEntry, HistoryItem, HistoryView};
pub use location::{CanonicalLocation, Coordinates};
pub use outcome::{FoldOutcome, TestRejection};
pub use render::{ClosedWindow, LastKnownState, PreviousWindow, RenderedWindow};
pub use window::{AlertWindow, DedupKey, GroupedLocations, WindowState};
