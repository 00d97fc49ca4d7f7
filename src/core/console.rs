//! Terminal output for operators
//!
//! Colors come from `colored`; `--no-color` turns them off globally.

use async_trait::async_trait;
use colored::Colorize;

use crate::core::engine::WindowUpdate;
use crate::core::export::WindowSink;
use crate::error::ExportError;
use crate::types::{ClosedWindow, RenderedWindow, WindowState};

/// Plain one-line summary, stable for logs and scripts
pub fn to_parseable_string(rendered: &RenderedWindow) -> String {
    format!(
        "state={} | seq={} | locations={} | {}",
        rendered.state, rendered.sequence_count, rendered.location_count, rendered.status_line
    )
}

/// Colored one-line summary
pub fn to_terminal_string(rendered: &RenderedWindow) -> String {
    let state = format!("[{}]", rendered.state);
    let state = match rendered.state {
        WindowState::Active if rendered.is_test => state.yellow().bold(),
        WindowState::Active => state.red().bold(),
        WindowState::Idle => state.green(),
    };
    let mut line = format!(
        "{} {} {} {}",
        rendered.state.emoji(),
        state,
        format!("#{}", rendered.sequence_count).dimmed(),
        rendered.status_line
    );
    if rendered.is_test {
        line.push_str(&format!(" {}", "(test)".yellow()));
    }
    line
}

pub fn closed_banner(closed: &ClosedWindow) -> String {
    let minutes = (closed.closed_at - closed.started_at).num_seconds() as f64 / 60.0;
    let header = format!(
        "── window closed: {} locations, {} updates, {:.1} min ──",
        closed.locations.len(),
        closed.sequence_count,
        minutes
    );
    format!("{}\n{}", header.cyan().bold(), closed.full_message)
}

#[derive(Debug, Clone, Default)]
pub struct ConsoleSink {
    /// Also print the idle line that follows every close
    pub show_idle: bool,
}

impl ConsoleSink {
    pub fn new(show_idle: bool) -> Self {
        Self { show_idle }
    }
}

#[async_trait]
impl WindowSink for ConsoleSink {
    fn name(&self) -> &'static str {
        "console"
    }

    async fn window_updated(&self, update: &WindowUpdate) -> Result<(), ExportError> {
        let rendered = &update.rendered;
        if rendered.state.is_active() || self.show_idle {
            println!("{}", to_terminal_string(rendered));
        }
        if update.watched_hit && rendered.state.is_active() {
            println!("  {}", "watched location in alert".red().bold());
        }
        Ok(())
    }

    async fn window_closed(&self, closed: &ClosedWindow) -> Result<(), ExportError> {
        println!("{}", closed_banner(closed));
        Ok(())
    }

    async fn terminated(&self, rendered: &RenderedWindow) -> Result<(), ExportError> {
        println!("{} {}", "shutdown".dimmed(), to_parseable_string(rendered));
        Ok(())
    }
}
