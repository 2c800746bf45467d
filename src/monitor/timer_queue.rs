//! Timer-queue monitor.
//!
//! Passively samples the driver's process-wide [`TimerQueue`]: how many
//! watchdog entries are pending and how many completed since the previous
//! tick. The driver is reached only through [`TimerQueueProbe`], so a
//! mismatch surfaces as an [`IntrospectionError`] that stops this monitor
//! and nothing else.

use std::fmt;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::error::IntrospectionError;
use crate::shutdown::Shutdown;
use crate::store::TimerQueue;

/// One reading of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerQueueSnapshot {
    pub queue_length: usize,
    pub counter: u32,
}

/// Read-only access to the driver's timer queue.
pub trait TimerQueueProbe: Send + 'static {
    fn snapshot(&self) -> Result<TimerQueueSnapshot, IntrospectionError>;
}

/// Probe over the timer queue the bundled store drivers register with.
#[derive(Debug, Clone, Copy)]
pub struct DriverTimerQueueProbe {
    queue: &'static TimerQueue,
}

impl DriverTimerQueueProbe {
    /// Find the process-wide queue. Fails if no store has created it yet.
    pub fn locate() -> Result<Self, IntrospectionError> {
        TimerQueue::installed()
            .map(Self::attach)
            .ok_or(IntrospectionError::NotInstalled)
    }

    pub fn attach(queue: &'static TimerQueue) -> Self {
        Self { queue }
    }
}

impl TimerQueueProbe for DriverTimerQueueProbe {
    /// The length comes from the lock-free mirror. When the container lock
    /// happens to be free, the mirror is checked against it first.
    fn snapshot(&self) -> Result<TimerQueueSnapshot, IntrospectionError> {
        if let Some(audit) = self.queue.try_audit()? {
            if !audit.is_consistent() {
                return Err(IntrospectionError::Field {
                    field: "depth",
                    reason: format!(
                        "mirror reads {} but {} entries are pending",
                        audit.mirror, audit.pending
                    ),
                });
            }
        }

        let state = self.queue.state();
        Ok(TimerQueueSnapshot {
            queue_length: state.depth,
            counter: state.counter,
        })
    }
}

/// Completions between two counter readings.
///
/// The counter is a wrapping `u32`. A reading below the previous one is
/// taken to mean the counter wrapped once during the tick, and the rate is
/// the distance travelled through `u32::MAX`.
pub fn completion_rate(previous: u32, current: u32) -> u32 {
    current.wrapping_sub(previous)
}

/// What one tick reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerQueueReport {
    pub queue_length: usize,
    pub rate: u32,
    pub previous_counter: u32,
    pub wrapped: bool,
}

impl fmt::Display for TimerQueueReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Timer queue has a queue depth of {} with rate {} and the counter at {}",
            self.queue_length, self.rate, self.previous_counter
        )
    }
}

/// The single line logged when introspection fails.
pub fn failure_line(err: &IntrospectionError) -> String {
    format!("Caught error in timer queue monitor: {}", err)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorState {
    Uninitialized,
    Sampling,
    Failed(IntrospectionError),
}

/// How a monitor run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerQueueOutcome {
    /// Introspection failed; the monitor stopped on its own.
    Failed(IntrospectionError),
    /// Shutdown was signalled while sampling (or before setup finished).
    Stopped { samples: u64 },
}

/// Sampling state machine: `Uninitialized -> Sampling`, with any
/// introspection error moving it to the terminal `Failed`.
#[derive(Debug)]
pub struct TimerQueueMonitor<P> {
    probe: Option<P>,
    state: MonitorState,
    previous: u32,
}

impl<P: TimerQueueProbe> Default for TimerQueueMonitor<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: TimerQueueProbe> TimerQueueMonitor<P> {
    pub fn new() -> Self {
        Self {
            probe: None,
            state: MonitorState::Uninitialized,
            previous: 0,
        }
    }

    pub fn state(&self) -> &MonitorState {
        &self.state
    }

    /// One-time setup. Only valid from `Uninitialized`.
    pub fn initialize<F>(&mut self, locate: F) -> Result<(), IntrospectionError>
    where
        F: FnOnce() -> Result<P, IntrospectionError>,
    {
        if let MonitorState::Failed(err) = &self.state {
            return Err(err.clone());
        }
        if self.probe.is_some() {
            return Ok(());
        }

        let probe = locate().map_err(|e| self.fail(e))?;
        // the first read proves the fields are reachable
        probe.snapshot().map_err(|e| self.fail(e))?;

        self.probe = Some(probe);
        self.state = MonitorState::Sampling;
        Ok(())
    }

    /// Read the queue and compute the rate since the previous sample.
    pub fn sample(&mut self) -> Result<TimerQueueReport, IntrospectionError> {
        if let MonitorState::Failed(err) = &self.state {
            return Err(err.clone());
        }
        let read = match &self.probe {
            Some(probe) => probe.snapshot(),
            None => Err(IntrospectionError::NotInstalled),
        };
        let snapshot = read.map_err(|e| self.fail(e))?;

        let report = TimerQueueReport {
            queue_length: snapshot.queue_length,
            rate: completion_rate(self.previous, snapshot.counter),
            previous_counter: self.previous,
            wrapped: snapshot.counter < self.previous,
        };
        self.previous = snapshot.counter;
        Ok(report)
    }

    fn fail(&mut self, err: IntrospectionError) -> IntrospectionError {
        self.probe = None;
        self.state = MonitorState::Failed(err.clone());
        err
    }
}

/// Locate the queue once, then sample every `interval` until shutdown or
/// the first introspection error.
pub async fn run_timer_queue_monitor<P, F>(
    locate: F,
    interval: Duration,
    mut shutdown: Shutdown,
) -> TimerQueueOutcome
where
    P: TimerQueueProbe,
    F: FnOnce() -> Result<P, IntrospectionError>,
{
    let mut monitor = TimerQueueMonitor::new();
    if let Err(e) = monitor.initialize(locate) {
        error!("{}", failure_line(&e));
        return TimerQueueOutcome::Failed(e);
    }

    let mut samples = 0u64;
    while !shutdown.is_shutdown() {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        match monitor.sample() {
            Ok(report) => {
                samples += 1;
                if report.wrapped {
                    debug!(
                        previous = report.previous_counter,
                        "timer queue counter wrapped"
                    );
                }
                info!("{}", report);
            }
            Err(e) => {
                error!("{}", failure_line(&e));
                return TimerQueueOutcome::Failed(e);
            }
        }
    }

    TimerQueueOutcome::Stopped { samples }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};
    use tokio::sync::broadcast;

    /// Replays scripted readings.
    #[derive(Clone, Default)]
    struct ScriptedProbe {
        readings: Arc<Mutex<Vec<Result<TimerQueueSnapshot, IntrospectionError>>>>,
    }

    impl ScriptedProbe {
        fn new(counters: &[u32]) -> Self {
            let readings = counters
                .iter()
                .rev()
                .map(|&counter| {
                    Ok(TimerQueueSnapshot {
                        queue_length: 3,
                        counter,
                    })
                })
                .collect();
            Self {
                readings: Arc::new(Mutex::new(readings)),
            }
        }
    }

    impl TimerQueueProbe for ScriptedProbe {
        fn snapshot(&self) -> Result<TimerQueueSnapshot, IntrospectionError> {
            self.readings
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Err(IntrospectionError::Field {
                    field: "counter",
                    reason: "script exhausted".into(),
                }))
        }
    }

    #[test]
    fn test_completion_rate() {
        assert_eq!(completion_rate(18, 25), 7);
        assert_eq!(completion_rate(0, 0), 0);
        assert_eq!(completion_rate(25, 3), u32::MAX - 21);
        assert_eq!(completion_rate(u32::MAX, 0), 1);
    }

    #[test]
    fn test_sample_reports_previous_counter() {
        // first reading is consumed by initialize()
        let probe = ScriptedProbe::new(&[0, 18, 25]);
        let mut monitor = TimerQueueMonitor::new();
        monitor.initialize(|| Ok(probe)).unwrap();
        assert_eq!(monitor.state(), &MonitorState::Sampling);

        let first = monitor.sample().unwrap();
        assert_eq!(first.rate, 18);
        assert_eq!(first.previous_counter, 0);

        let second = monitor.sample().unwrap();
        assert_eq!(
            second,
            TimerQueueReport {
                queue_length: 3,
                rate: 7,
                previous_counter: 18,
                wrapped: false,
            }
        );
    }

    #[test]
    fn test_decreasing_counter_is_wraparound() {
        let probe = ScriptedProbe::new(&[0, 25, 3]);
        let mut monitor = TimerQueueMonitor::new();
        monitor.initialize(|| Ok(probe)).unwrap();

        monitor.sample().unwrap();
        let report = monitor.sample().unwrap();
        assert!(report.wrapped);
        assert_eq!(report.rate, 3u32.wrapping_sub(25));
        assert_eq!(monitor.state(), &MonitorState::Sampling);
    }

    #[test]
    fn test_locate_failure_is_terminal() {
        let mut monitor = TimerQueueMonitor::<ScriptedProbe>::new();
        let err = monitor
            .initialize(|| Err(IntrospectionError::NotInstalled))
            .unwrap_err();

        assert_eq!(err, IntrospectionError::NotInstalled);
        assert_eq!(
            monitor.state(),
            &MonitorState::Failed(IntrospectionError::NotInstalled)
        );
        assert!(monitor.sample().is_err());
        assert!(monitor.initialize(|| Ok(ScriptedProbe::new(&[0]))).is_err());
    }

    #[test]
    fn test_read_failure_while_sampling() {
        let probe = ScriptedProbe::new(&[0, 5]);
        let mut monitor = TimerQueueMonitor::new();
        monitor.initialize(|| Ok(probe)).unwrap();

        monitor.sample().unwrap();
        assert!(monitor.sample().is_err());
        assert!(matches!(monitor.state(), MonitorState::Failed(_)));
    }

    #[test]
    fn test_driver_probe_reads_global_queue() {
        let queue = TimerQueue::global();
        let probe = DriverTimerQueueProbe::locate().unwrap();
        let _entry = queue.add(Duration::from_secs(30));

        let snapshot = probe.snapshot().unwrap();
        assert!(snapshot.queue_length >= 1);
    }

    #[test]
    fn test_driver_probe_rejects_skewed_mirror() {
        let queue: &'static TimerQueue = Box::leak(Box::new(TimerQueue::new()));
        let _entry = queue.add(Duration::from_secs(30));
        let probe = DriverTimerQueueProbe::attach(queue);

        let mut monitor = TimerQueueMonitor::new();
        monitor.initialize(|| Ok(probe)).unwrap();
        assert_eq!(monitor.sample().unwrap().queue_length, 1);

        queue.skew_mirror(4);
        let err = monitor.sample().unwrap_err();
        assert_eq!(
            err,
            IntrospectionError::Field {
                field: "depth",
                reason: "mirror reads 4 but 1 entries are pending".into(),
            }
        );
        assert!(matches!(monitor.state(), MonitorState::Failed(_)));
    }

    #[test]
    fn test_driver_probe_sees_leaked_entry() {
        let queue: &'static TimerQueue = Box::leak(Box::new(TimerQueue::new()));
        std::mem::forget(queue.add(Duration::from_secs(30)));
        drop(queue.add(Duration::from_secs(30)));

        let snapshot = DriverTimerQueueProbe::attach(queue).snapshot().unwrap();
        assert_eq!(
            snapshot,
            TimerQueueSnapshot {
                queue_length: 1,
                counter: 1,
            }
        );
    }

    #[test]
    fn test_status_lines() {
        let report = TimerQueueReport {
            queue_length: 12,
            rate: 7,
            previous_counter: 18,
            wrapped: false,
        };
        assert_eq!(
            report.to_string(),
            "Timer queue has a queue depth of 12 with rate 7 and the counter at 18"
        );
        assert_eq!(
            failure_line(&IntrospectionError::NotInstalled),
            "Caught error in timer queue monitor: timer queue singleton is not installed"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let (tx, rx) = broadcast::channel(1);
        let probe = ScriptedProbe::new(&[0, 1, 2, 3, 4, 5]);
        let monitor = tokio::spawn(run_timer_queue_monitor(
            move || Ok(probe),
            Duration::from_millis(1000),
            Shutdown::new(rx),
        ));

        tokio::time::sleep(Duration::from_millis(3500)).await;
        tx.send(()).unwrap();

        assert_eq!(
            monitor.await.unwrap(),
            TimerQueueOutcome::Stopped { samples: 3 }
        );
    }

    #[tokio::test]
    async fn test_run_fails_once_without_queue() {
        let (_tx, rx) = broadcast::channel(1);
        let outcome = run_timer_queue_monitor::<ScriptedProbe, _>(
            || Err(IntrospectionError::NotInstalled),
            Duration::from_millis(1000),
            Shutdown::new(rx),
        )
        .await;

        assert_eq!(
            outcome,
            TimerQueueOutcome::Failed(IntrospectionError::NotInstalled)
        );
    }
}
