//! dbstress — seed, load, and sample until interrupted.
//!
//! # Usage
//!
//! ```bash
//! # Against MySQL on $DB_SERVER (default localhost)
//! dbstress
//!
//! # No database: in-process store
//! dbstress --database-url memory://
//! ```

use anyhow::Context;
use clap::Parser;
use colored::*;
use dbstress::cli::Cli;
use dbstress::prelude::*;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.into_config().context("invalid configuration")?;
    let target = match config.database_url {
        Some(_) => "configured database URL",
        None => config.db_server.as_str(),
    };
    info!(
        "Connecting to {} ({} pollers, page size {})",
        target, config.pollers, config.page_size
    );

    let store = dbstress::store::open(&config)
        .await
        .context("failed to open record store")?;

    let (notify, _) = broadcast::channel(1);
    let signal_tx = notify.clone();
    tokio::spawn(async move {
        dbstress::shutdown::signal().await;
        let _ = signal_tx.send(());
    });

    let summary = match dbstress::run(&config, store, DriverTimerQueueProbe::locate, notify).await {
        Ok(summary) => summary,
        Err(StressError::Cancelled) => {
            println!("{}", "Interrupted before load started".yellow());
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    println!(
        "{} {} list calls across {} pollers ({} ignored failures), {} scheduling samples",
        "✓ Stopped:".green(),
        summary.total_iterations(),
        summary.pollers.len(),
        summary.total_failures(),
        summary.scheduling_ticks
    );
    if let TimerQueueOutcome::Failed(e) = &summary.timer_queue {
        println!("{} timer queue monitor stopped early: {}", "⚠".yellow(), e);
    }
    Ok(())
}
