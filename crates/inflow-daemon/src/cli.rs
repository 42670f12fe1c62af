use std::path::PathBuf;

use clap::Parser;

/// TCP syslog ingest-and-dispatch daemon.
#[derive(Debug, Parser)]
#[command(name = "inflowd", version, about)]
pub struct Cli {
    /// Path to the directive-table config file (spec.md §6).
    #[arg(short, long, value_name = "FILE")]
    pub config: PathBuf,

    /// Shutdown grace period, in seconds, before a non-exiting daemon logs
    /// a warning (the shutdown itself is not cancellable — spec.md §4.5).
    #[arg(long, default_value_t = 30)]
    pub shutdown_grace_secs: u64,

    /// Worker threads per queue.
    #[arg(long, default_value_t = 2)]
    pub workers_per_queue: usize,
}
