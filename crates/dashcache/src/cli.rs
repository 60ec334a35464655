//! Exposes the command line application.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dashcache_service::caching::CacheStore;
use dashcache_service::config::Config;

use crate::logging;

/// Dashcache commands.
#[derive(Debug, Subcommand)]
enum Command {
    /// Print cache statistics.
    Stats,

    /// Delete expired and corrupt cache entries.
    Cleanup {
        /// Only report what would be deleted.
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete every cache entry.
    Clear,
}

/// Command line interface parser.
#[derive(Debug, Parser)]
#[command(name = "dashcache", version, about)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short = 'c', global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Returns the path to the configuration file.
    fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::get(cli.config()).context("failed loading config")?;

    // SAFETY: no other threads are running this early.
    unsafe { logging::init_logging(&config) };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to create runtime")?;

    runtime.block_on(async {
        let store = CacheStore::from_config(&config);
        match cli.command {
            Command::Stats => stats(&store).await,
            Command::Cleanup { dry_run } => cleanup(&store, dry_run).await,
            Command::Clear => {
                store.clear_all().await;
                println!("cache cleared");
            }
        }
    });

    Ok(())
}

async fn stats(store: &CacheStore) {
    let stats = store.stats().await;

    println!("backend: {}", stats.backend);
    println!("entries: {}", stats.entry_count);
    if let Some(age) = stats.oldest_entry_age {
        println!("oldest:  {} ago", humantime::format_duration(truncate(age)));
    }
    if let Some(age) = stats.newest_entry_age {
        println!("newest:  {} ago", humantime::format_duration(truncate(age)));
    }
    match (stats.usage.quota_bytes, stats.usage.usage_percent()) {
        (Some(quota), Some(percent)) => println!(
            "usage:   {} / {} bytes ({percent:.1}%)",
            stats.usage.used_bytes, quota
        ),
        _ => println!("usage:   {} bytes", stats.usage.used_bytes),
    }
}

async fn cleanup(store: &CacheStore, dry_run: bool) {
    let stats = store.cleanup(dry_run).await;

    let verb = if dry_run { "would remove" } else { "removed" };
    println!(
        "{verb} {} entries ({} bytes)",
        stats.removed_entries, stats.removed_bytes
    );
    println!(
        "retained {} entries ({} bytes)",
        stats.retained_entries, stats.retained_bytes
    );
}

/// Drops sub-second precision for human-readable durations.
fn truncate(duration: std::time::Duration) -> std::time::Duration {
    std::time::Duration::from_secs(duration.as_secs())
}
