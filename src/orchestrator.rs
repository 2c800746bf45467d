//! Top-level run: seed, then drive load and sample until shutdown.
//!
//! The seeder finishes before anything else starts. After that the poller
//! pool and both monitors run side by side with no ordering between them.
//! None of them completes unless the shutdown broadcast fires, so without
//! a signal [`run`] never returns.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;

use crate::config::Config;
use crate::error::{IntrospectionError, StressError, StressResult};
use crate::monitor::{
    TimerQueueOutcome, TimerQueueProbe, run_scheduling_monitor, run_timer_queue_monitor,
};
use crate::poller::{PollerState, spawn_pollers};
use crate::seeder::{SeedReport, seed};
use crate::shutdown::Shutdown;
use crate::store::RecordStore;

/// Final state of every activity, available once shutdown has completed.
#[derive(Debug)]
pub struct RunSummary {
    pub seed: SeedReport,
    /// One entry per worker, ordered by worker index
    pub pollers: Vec<PollerState>,
    pub scheduling_ticks: u64,
    pub timer_queue: TimerQueueOutcome,
}

impl RunSummary {
    pub fn total_iterations(&self) -> u64 {
        self.pollers.iter().map(|p| p.iterations).sum()
    }

    pub fn total_failures(&self) -> u64 {
        self.pollers.iter().map(|p| p.failures).sum()
    }
}

/// Seed the store, then run the poller pool and both monitors until
/// `notify` fires.
///
/// `locate` finds the driver's timer queue; it is called once, after
/// seeding, from inside the timer-queue monitor.
pub async fn run<P, F>(
    config: &Config,
    store: Arc<dyn RecordStore>,
    locate: F,
    notify: broadcast::Sender<()>,
) -> StressResult<RunSummary>
where
    P: TimerQueueProbe,
    F: FnOnce() -> Result<P, IntrospectionError> + Send + 'static,
{
    config.validate()?;

    // every listener exists before seeding, so no signal can fall between
    // the end of seeding and the spawns
    let mut shutdown = Shutdown::new(notify.subscribe());
    let scheduling_shutdown = Shutdown::new(notify.subscribe());
    let timer_shutdown = Shutdown::new(notify.subscribe());
    let poller_shutdowns: Vec<Shutdown> = (0..config.pollers)
        .map(|_| Shutdown::new(notify.subscribe()))
        .collect();

    let seed_report = tokio::select! {
        _ = shutdown.recv() => return Err(StressError::Cancelled),
        report = seed(store.as_ref(), config.record_count, config.value_length) => report?,
    };

    info!(
        pollers = config.pollers,
        page_size = config.page_size,
        "Starting load"
    );

    let mut workers = spawn_pollers(Arc::clone(&store), config.page_size, poller_shutdowns);
    let scheduling = tokio::spawn(run_scheduling_monitor(
        config.scheduling_interval(),
        scheduling_shutdown,
    ));
    let timer_queue = tokio::spawn(run_timer_queue_monitor(
        locate,
        config.timer_queue_interval(),
        timer_shutdown,
    ));

    let collect_pollers = async {
        let mut states = Vec::with_capacity(config.pollers);
        while let Some(state) = workers.join_next().await {
            states.push(state?);
        }
        states.sort_by_key(|s| s.index);
        Ok::<_, StressError>(states)
    };

    let (pollers, scheduling_ticks, timer_queue) =
        tokio::join!(collect_pollers, scheduling, timer_queue);

    Ok(RunSummary {
        seed: seed_report,
        pollers: pollers?,
        scheduling_ticks: scheduling_ticks?,
        timer_queue: timer_queue?,
    })
}
