//! CLI argument parsing for coopsync

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "co")]
#[command(author, version, about = "Cooperative FIFO lock and interval loop", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Contend for an AsyncLock from several workers and show admission order
    Lock {
        /// Number of workers (default: 4)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Milliseconds each worker holds the lock (default: 10)
        #[arg(long)]
        hold_ms: Option<u64>,
    },

    /// Drive a demo task with an interval loop
    Interval {
        /// Default delay between runs in milliseconds (default: 1000)
        #[arg(short, long)]
        delay_ms: Option<u64>,

        /// Runs before the task cancels itself (default: 5)
        #[arg(short, long)]
        runs: Option<u64>,

        /// Make every Nth run fail (0 = never)
        #[arg(short, long)]
        fail_every: Option<u64>,
    },
}
