//! Core modules for RedAlert

pub mod api;
pub mod canonical;
pub mod clock;
pub mod console;
pub mod engine;
pub mod export;
pub mod feed;
pub mod gazetteer;
pub mod history;
pub mod renderer;
pub mod supervisor;
pub mod window;

pub use api::{create_router, run_server, ApiSink, LiveMessage};
pub use canonical::{canonicalize, extract_duration, is_forbidden};
pub use clock::{Clock, ManualClock, SystemClock};
pub use console::ConsoleSink;
pub use engine::{Engine, EngineEvent, WindowUpdate};
pub use export::{FileExporter, WindowSink};
pub use feed::{parse_live_body, AlertFeed, OrefFeedClient, StaticFeed};
pub use gazetteer::{Gazetteer, LocationResolver};
pub use history::HistoryStore;
pub use renderer::{RenderLimits, WindowRenderer};
pub use supervisor::{SharedEngine, Supervisor, TestTrigger};
pub use window::AlertWindowMachine;
