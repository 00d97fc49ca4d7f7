//! RedAlert CLI
//!
//! Usage:
//!   redalert run                          # Poll the live feed
//!   redalert run --serve                  # ... and serve the HTTP API
//!   redalert replay capture.jsonl         # Replay captured feed bodies offline
//!   redalert resolve "שדרות"              # Look a location up in the gazetteer

use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use redalert::config::AppConfig;
use redalert::core::console::{closed_banner, to_terminal_string};
use redalert::core::{
    canonicalize, create_router, parse_live_body, run_server, ApiSink, ConsoleSink, Engine,
    EngineEvent, Gazetteer, LocationResolver, ManualClock, OrefFeedClient, Supervisor, SystemClock,
};
use redalert::types::FeedPoll;
use redalert::VERSION;

#[derive(Parser, Debug)]
#[command(
    name = "redalert",
    version = VERSION,
    about = "RedAlert - consolidate civil-defense alerts into windows and history",
    long_about = "RedAlert polls the Home Front Command alert feed, folds consecutive\n\
                  snapshots into a single alert window and keeps a merged history.\n\n\
                  Window states:\n  \
                  IDLE   - No active alert\n  \
                  ACTIVE - Alert window open, locations accumulating"
)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Config file (YAML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Disable colors in output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll the live feed until Ctrl-C
    Run {
        /// Serve the HTTP API
        #[arg(short, long)]
        serve: bool,

        /// Server address (overrides config)
        #[arg(long)]
        addr: Option<String>,
    },
    /// Feed a JSON-lines capture through the engine (blank line = idle poll)
    Replay {
        file: PathBuf,
    },
    /// Print how a location name canonicalizes and resolves
    Resolve {
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    if args.no_color {
        colored::control::set_override(false);
    }

    let cfg = AppConfig::load(args.config.as_deref())?;

    match args.command {
        Command::Run { serve, addr } => run(cfg, serve, addr).await,
        Command::Replay { file } => replay(cfg, &file).await,
        Command::Resolve { name } => resolve(cfg, &name).await,
    }
}

/// Live mode
async fn run(mut cfg: AppConfig, serve: bool, addr: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    if serve {
        cfg.server.enabled = true;
    }
    if let Some(addr) = addr {
        cfg.server.addr = addr;
    }

    let feed = Arc::new(OrefFeedClient::new(cfg.feed.clone())?);
    let mut supervisor = Supervisor::new(cfg.clone(), feed, Arc::new(SystemClock));
    supervisor.add_sink(Arc::new(ConsoleSink::new(true)));

    let api = cfg.server.enabled.then(|| ApiSink::new(64));
    if let Some(api) = &api {
        supervisor.add_sink(Arc::new(api.clone()));
    }

    print_header(&cfg);
    let engine = supervisor.start().await?;

    if let Some(api) = api {
        let router = create_router(engine, supervisor.test_trigger(), api.sender());
        let addr = cfg.server.addr.clone();
        let token = supervisor.shutdown_token();
        tokio::spawn(async move {
            if let Err(e) = run_server(&addr, router).await {
                tracing::error!(error = %e, addr = %addr, "api server stopped");
                token.cancel();
            }
        });
    }

    supervisor.run().await?;
    Ok(())
}

/// Replay with a hand-driven clock. Only the gazetteer may touch the network,
/// and only when the local cache is missing.
async fn replay(cfg: AppConfig, file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let feed = OrefFeedClient::new(cfg.feed.clone())?;
    let clock = ManualClock::new(chrono::Utc::now());
    let step = chrono::Duration::seconds(cfg.poll_interval_secs as i64);
    let max_idle_polls = cfg.idle_timeout_secs / cfg.poll_interval_secs.max(1) + 2;
    let mut engine = Engine::with_gazetteer(cfg, &feed, Arc::new(clock.clone())).await?;

    let reader = io::BufReader::new(std::fs::File::open(file)?);
    let mut polls = 0usize;
    for line in reader.lines() {
        let line = line?;
        print_events(&engine.process_poll(parse_live_body(&line)));
        clock.advance(step);
        polls += 1;
    }

    // Let an open window run out
    for _ in 0..max_idle_polls {
        if !engine.state().is_active() {
            break;
        }
        print_events(&engine.process_poll(FeedPoll::Idle));
        clock.advance(step);
    }

    let view = engine.history_view();
    println!(
        "{} {} polls, {} history entries, {} locations",
        "replay done:".bold(),
        polls,
        view.len(),
        view.locations.len()
    );
    Ok(())
}

fn print_events(events: &[EngineEvent]) {
    for event in events {
        match event {
            EngineEvent::WindowUpdated(update) if update.rendered.state.is_active() => {
                println!("{}", to_terminal_string(&update.rendered));
            }
            EngineEvent::WindowClosed(closed) => println!("{}", closed_banner(closed)),
            _ => {}
        }
    }
}

/// Gazetteer lookup for a single name
async fn resolve(cfg: AppConfig, name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let feed = OrefFeedClient::new(cfg.feed.clone())?;
    let gazetteer = Gazetteer::load(&cfg.gazetteer_path, &feed).await?;
    let key = canonicalize(name);

    println!("raw:       {}", name);
    println!("canonical: {}", key);
    match gazetteer.resolve(&key) {
        Some(loc) => {
            println!("name:      {}", loc.display_name.green());
            println!("area:      {}", loc.area);
            match loc.coordinates {
                Some(c) => println!("coords:    {:.4}, {:.4}", c.lat, c.lon),
                None => println!("coords:    -"),
            }
        }
        None => println!("{}", "not found in gazetteer".yellow()),
    }
    Ok(())
}

fn print_header(cfg: &AppConfig) {
    println!("{}", format!("RedAlert v{}", VERSION).bold());
    println!("  poll every {}s, idle after {}s", cfg.poll_interval_secs, cfg.idle_timeout_secs);
    if !cfg.watched_locations.is_empty() {
        println!("  watching: {}", cfg.watched_locations.join(", "));
    }
    if cfg.save_files {
        println!("  files: {}", cfg.output_dir.display());
    }
    println!();
}
