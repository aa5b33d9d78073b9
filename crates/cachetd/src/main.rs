//! Cachet demo driver
//!
//! Wires a cache to a store (record log on disk, or in memory), then walks
//! through read-through, write-through, entry processors and listeners, and
//! finishes with a concurrent increment run.

mod demo;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use cachet::{CacheSettings, LogStore, MemoryStore};
use clap::Parser;
use tracing::info;

use crate::demo::DemoOptions;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Data directory for the record log (in-memory store when omitted)
    #[arg(short, long)]
    data: Option<PathBuf>,

    /// JSON file with cache settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Worker threads for the increment run
    #[arg(short, long, default_value_t = 4)]
    workers: usize,

    /// Increments per worker
    #[arg(short, long, default_value_t = 1000)]
    increments: u64,
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    info!("Starting Cachet demo v{}", env!("CARGO_PKG_VERSION"));

    let settings = match &args.config {
        Some(path) => {
            info!("Loading cache settings from {}", path.display());
            CacheSettings::load(path)?
        }
        None => CacheSettings::default(),
    };

    let options = DemoOptions {
        settings,
        workers: args.workers,
        increments: args.increments,
    };

    let report = match &args.data {
        Some(dir) => {
            info!("Data directory: {}", dir.display());
            demo::run(Arc::new(LogStore::open(dir)?), &options)?
        }
        None => {
            info!("Using in-memory store");
            demo::run(Arc::new(MemoryStore::<String>::new()), &options)?
        }
    };

    info!(
        processed = report.processed.len(),
        counter = report.counter,
        events = report.events,
        "Demo finished"
    );

    Ok(())
}
