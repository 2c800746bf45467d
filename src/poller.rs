//! Poller pool.
//!
//! Each worker lists a page of records in a tight loop. A failed call is
//! logged and the loop carries on at once: no backoff, no retry cap.
//! Workers own their state and share nothing with one another.

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{info, trace, warn};

use crate::error::StressError;
use crate::shutdown::Shutdown;
use crate::store::RecordStore;

/// A progress line is logged every this many iterations.
pub const PROGRESS_EVERY: u64 = 10;

/// Private per-worker counters, returned when the worker stops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollerState {
    pub index: usize,
    /// Attempts, successful or not
    pub iterations: u64,
    pub failures: u64,
    /// Highest id seen on the most recent successful page
    pub last_id: Option<i64>,
}

impl PollerState {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            ..Self::default()
        }
    }

    /// Number of successful list calls.
    pub fn successes(&self) -> u64 {
        self.iterations - self.failures
    }
}

pub fn progress_line(index: usize, iterations: u64) -> String {
    format!("{}: Listed {} times", index, iterations)
}

pub fn ignored_failure_line(err: &StressError) -> String {
    format!("Ignoring exception caught when listing records: {}", err)
}

/// Run one worker until shutdown.
pub async fn run_poller(
    index: usize,
    store: Arc<dyn RecordStore>,
    page_size: usize,
    mut shutdown: Shutdown,
) -> PollerState {
    let mut state = PollerState::new(index);

    while !shutdown.is_shutdown() {
        let result = tokio::select! {
            _ = shutdown.recv() => break,
            result = store.list_ordered(page_size) => result,
        };
        state.iterations += 1;

        match result {
            Ok(records) => {
                let mut last_id = None;
                for record in &records {
                    last_id = Some(record.id);
                }
                state.last_id = last_id;
                trace!(worker = index, rows = records.len(), ?last_id, "page listed");

                if state.iterations % PROGRESS_EVERY == 0 {
                    info!("{}", progress_line(index, state.iterations));
                }
            }
            Err(e) => {
                state.failures += 1;
                warn!("{}", ignored_failure_line(&e));
            }
        }
    }

    state
}

/// Spawn one worker per shutdown listener; worker `i` gets listener `i`.
///
/// Listeners are subscribed by the caller, so a signal sent before the
/// workers exist still reaches them.
pub fn spawn_pollers(
    store: Arc<dyn RecordStore>,
    page_size: usize,
    listeners: Vec<Shutdown>,
) -> JoinSet<PollerState> {
    let mut workers = JoinSet::new();
    for (index, shutdown) in listeners.into_iter().enumerate() {
        workers.spawn(run_poller(index, Arc::clone(&store), page_size, shutdown));
    }
    workers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRecordStore;
    use std::time::Duration;
    use tokio::sync::broadcast;

    fn listeners(notify: &broadcast::Sender<()>, count: usize) -> Vec<Shutdown> {
        (0..count)
            .map(|_| Shutdown::new(notify.subscribe()))
            .collect()
    }

    async fn seeded(records: i64) -> Arc<MemoryRecordStore> {
        let store = Arc::new(MemoryRecordStore::default());
        for id in 0..records {
            store.insert_if_absent(id, "value").await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_failures_are_swallowed() {
        let store = seeded(5).await;
        store.fail_next(25);

        let (tx, rx) = broadcast::channel(1);
        let worker = tokio::spawn(run_poller(
            7,
            store.clone() as Arc<dyn RecordStore>,
            100,
            Shutdown::new(rx),
        ));

        while store.list_calls() < 40 {
            tokio::task::yield_now().await;
        }
        tx.send(()).unwrap();
        let state = worker.await.unwrap();

        assert_eq!(state.index, 7);
        assert_eq!(state.failures, 25);
        assert!(state.successes() >= 14);
        assert_eq!(state.last_id, Some(4));
    }

    #[tokio::test]
    async fn test_page_is_bounded() {
        let store = seeded(20).await;
        let (tx, rx) = broadcast::channel(1);
        let worker = tokio::spawn(run_poller(0, store.clone(), 8, Shutdown::new(rx)));

        while store.list_calls() < 3 {
            tokio::task::yield_now().await;
        }
        tx.send(()).unwrap();

        let state = worker.await.unwrap();
        assert_eq!(state.last_id, Some(7));
        assert_eq!(state.failures, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_pool_workers_progress_independently() {
        let store = seeded(50).await;
        let (tx, _rx) = broadcast::channel(1);
        let mut workers = spawn_pollers(store, 50, listeners(&tx, 250));

        tokio::time::sleep(Duration::from_millis(500)).await;
        tx.send(()).unwrap();

        let mut seen = Vec::new();
        while let Some(state) = workers.join_next().await {
            let state = state.unwrap();
            assert!(
                state.iterations >= PROGRESS_EVERY,
                "worker {} only ran {} times",
                state.index,
                state.iterations
            );
            seen.push(state.index);
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..250).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_signal_before_spawn_still_stops_workers() {
        let store = seeded(5).await;
        let (tx, _rx) = broadcast::channel(1);
        let subscribed = listeners(&tx, 3);

        tx.send(()).unwrap();
        let mut workers = spawn_pollers(store, 10, subscribed);

        let mut stopped = 0;
        while let Some(state) = tokio::time::timeout(Duration::from_secs(5), workers.join_next())
            .await
            .expect("workers missed the signal")
        {
            state.unwrap();
            stopped += 1;
        }
        assert_eq!(stopped, 3);
    }

    #[test]
    fn test_status_lines() {
        assert_eq!(progress_line(17, 40), "17: Listed 40 times");
        assert_eq!(
            ignored_failure_line(&StressError::database("connection reset")),
            "Ignoring exception caught when listing records: Database error: connection reset"
        );
    }
}
