//! tickflow - demo driver

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tickflow::runtime::global;
use tickflow::util::{config, logger};
use tickflow::{Cancelled, Co, Group, SystemClock, Watchdog, VERSION};
use tracing::{error, info};

/// Tick-driven coroutine demos
#[derive(Parser, Debug)]
#[command(name = "tickflow")]
#[command(version = VERSION)]
#[command(about = "Tick-driven coroutine demos", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to $TICKFLOW_CONFIG)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Ticks per second
    #[arg(long, default_value_t = 60)]
    fps: u32,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Two periodic displays under a parent that finishes after a while
    Display {
        /// How long the parent runs before it returns
        #[arg(long, default_value_t = 10)]
        seconds: u64,
    },

    /// A body that blocks outside the engine and trips the watchdog
    Stall,
}

fn display_every(
    co: &Co,
    period: Duration,
    label: &'static str,
) -> Result<(), Cancelled> {
    loop {
        co.sleep(period)?;
        println!("{}", label);
    }
}

fn spawn_or_log<F>(
    co: &Co,
    label: &str,
    body: F,
) where
    F: FnOnce(&Co) -> Result<(), Cancelled> + Send + 'static,
{
    if let Err(e) = co.spawn(body) {
        error!("failed to start {}: {}", label, e);
    }
}

fn display(
    co: &Co,
    seconds: u64,
) -> Result<(), Cancelled> {
    spawn_or_log(co, "A", |co: &Co| display_every(co, Duration::from_secs(1), "A"));
    spawn_or_log(co, "B", |co: &Co| display_every(co, Duration::from_secs(2), "B"));
    co.sleep(Duration::from_secs(seconds))?;
    println!("done");
    Ok(())
}

/// Display B blocks the tick loop with a real sleep.
fn stall(co: &Co) -> Result<(), Cancelled> {
    spawn_or_log(co, "A", |co: &Co| display_every(co, Duration::from_secs(1), "A"));
    spawn_or_log(co, "B", |co: &Co| {
        co.sleep(Duration::ZERO)?;
        loop {
            thread::sleep(Duration::from_secs(2));
            println!("B");
        }
    });
    co.sleep(Duration::from_secs(10))?;
    println!("done");
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let cfg = match &args.config {
        Some(path) => config::load_config(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => config::load_from_env().context("Failed to load config")?,
    };
    if args.verbose {
        logger::init_debug();
    } else {
        logger::init_with_level(cfg.log.level());
    }
    info!("tickflow {} at {} fps", VERSION, args.fps);

    let group = Group::with_config(cfg.scheduler.clone(), Arc::new(SystemClock));
    global::install(group.clone())?;

    let watchdog = if cfg.watchdog.enabled {
        Some(Watchdog::watching(cfg.watchdog.timeout(), &group)?)
    } else {
        None
    };

    match args.command {
        Commands::Display { seconds } => {
            global::spawn(move |co: &Co| display(co, seconds))?;
        }
        Commands::Stall => {
            global::spawn(stall)?;
        }
    }

    let frame = Duration::from_secs_f64(1.0 / f64::from(args.fps.max(1)));
    while group.running() > 0 {
        thread::sleep(frame);
        global::tick()?;
        if let Some(watchdog) = &watchdog {
            watchdog.reset();
        }
    }
    global::stop()?;
    if let Some(watchdog) = watchdog {
        watchdog.stop();
    }
    info!("all coroutines finished");
    Ok(())
}
