//! co - demo driver for the coopsync primitives

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use clap::Parser;
use colored::*;
use eyre::{Context, Result, eyre};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info};

use coopsync::cli::{Cli, Command};
use coopsync::config::Config;
use coopsync::{AsyncLock, Directive, IntervalStats, StopReason, TaskFailure, start_interval_with_reporter};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("coopsync")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Priority: CLI --log-level > config file > INFO
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(log_dir.join("coopsync.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Lock { workers, hold_ms } => {
            let workers = workers.unwrap_or(config.lock.workers);
            let hold = hold_ms.map(Duration::from_millis).unwrap_or_else(|| config.lock.hold());
            cmd_lock(workers, hold).await
        }
        Command::Interval {
            delay_ms,
            runs,
            fail_every,
        } => {
            let delay = delay_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| config.interval.default_delay());
            let runs = runs.unwrap_or(config.interval.max_runs);
            let fail_every = fail_every.unwrap_or(config.interval.fail_every);
            cmd_interval(delay, runs, fail_every).await
        }
    }
}

/// Spawn `workers` tasks that queue on one lock in spawn order
async fn cmd_lock(workers: usize, hold: Duration) -> Result<()> {
    info!(workers, ?hold, "cmd_lock: called");
    let lock = AsyncLock::new();
    let active = Arc::new(AtomicUsize::new(0));
    let overlapped = Arc::new(AtomicBool::new(false));
    let (tx, mut rx) = mpsc::unbounded_channel();

    let mut handles = Vec::with_capacity(workers);
    for id in 0..workers {
        let acquire = lock.enter();
        let active = active.clone();
        let overlapped = overlapped.clone();
        let tx = tx.clone();
        handles.push(tokio::spawn(async move {
            let release = acquire.await;
            if active.fetch_add(1, Ordering::SeqCst) > 0 {
                overlapped.store(true, Ordering::SeqCst);
            }
            let _ = tx.send(id);
            tokio::time::sleep(hold).await;
            active.fetch_sub(1, Ordering::SeqCst);
            release.release();
        }));
    }
    drop(tx);

    for handle in handles {
        handle.await.context("Lock worker panicked")?;
    }

    let mut order = Vec::with_capacity(workers);
    while let Some(id) = rx.recv().await {
        order.push(id);
    }

    let in_order = order.iter().copied().eq(0..workers);
    let order_text = order.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(" ");
    println!("Admission order: {}", order_text.cyan());
    if in_order {
        println!("{} Workers admitted in call order", "✓".green());
    } else {
        println!("{} Workers admitted out of call order", "✗".red());
    }
    if overlapped.load(Ordering::SeqCst) {
        return Err(eyre!("Critical sections overlapped"));
    }
    println!("{} No overlapping critical sections", "✓".green());
    Ok(())
}

/// Run a counting task that fails every `fail_every` runs and stops after `runs`
async fn cmd_interval(delay: Duration, runs: u64, fail_every: u64) -> Result<()> {
    info!(?delay, runs, fail_every, "cmd_interval: called");
    let started = Instant::now();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let reporter = |message: &str, failure: &TaskFailure| {
        tracing::error!(%failure, "{}", message);
        eprintln!("{} {}: {}", "!".red(), message, failure);
    };

    let mut count = 0u64;
    let handle = start_interval_with_reporter(
        move || {
            count += 1;
            let run = count;
            let _ = tx.send((run, started.elapsed()));
            async move {
                if fail_every > 0 && run % fail_every == 0 {
                    return Err(eyre!("simulated failure on run {}", run));
                }
                if run >= runs {
                    return Ok(Directive::Cancel);
                }
                Ok(Directive::Continue)
            }
        },
        delay,
        Arc::new(reporter),
    );

    let canceller = handle.canceller();
    let join = handle.join();
    tokio::pin!(join);

    let stats = loop {
        tokio::select! {
            stats = &mut join => break stats?,
            Some((run, elapsed)) = rx.recv() => {
                println!("run {:>3} at {:>8.1?}", run.to_string().cyan(), elapsed);
            }
            _ = tokio::signal::ctrl_c() => {
                println!("{} Interrupted, cancelling", "!".yellow());
                canceller.cancel();
            }
        }
    };

    // Runs reported after the loop stopped
    while let Ok((run, elapsed)) = rx.try_recv() {
        println!("run {:>3} at {:>8.1?}", run.to_string().cyan(), elapsed);
    }

    print_stats(&stats);
    Ok(())
}

fn print_stats(stats: &IntervalStats) {
    let reason = match stats.stop_reason {
        StopReason::Directive => "task cancelled",
        StopReason::External => "cancelled externally",
    };
    println!(
        "{} Stopped ({}) after {} runs, {} failed",
        "✓".green(),
        reason,
        stats.invocations,
        stats.failures
    );
}
