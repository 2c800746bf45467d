//! Scheduling-delay monitor.
//!
//! Sleeps for a fixed interval and reports how much longer than requested
//! the sleep took. When the runtime's workers are saturated the wake-up is
//! late, so a growing delay is the earliest sign of overload, independent
//! of anything the database does.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tracing::info;

use crate::shutdown::Shutdown;

/// One requested wait and how long it actually took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulingSample {
    pub requested: Duration,
    pub elapsed: Duration,
}

impl SchedulingSample {
    /// `elapsed - requested` in whole milliseconds. Negative only if the
    /// clock misbehaves.
    pub fn delay_ms(&self) -> i64 {
        self.elapsed.as_millis() as i64 - self.requested.as_millis() as i64
    }
}

impl fmt::Display for SchedulingSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Scheduling delay was {}", self.delay_ms())
    }
}

/// Sample forever, one line per tick, until shutdown. Returns the number of
/// completed ticks.
pub async fn run_scheduling_monitor(target: Duration, mut shutdown: Shutdown) -> u64 {
    let mut ticks = 0u64;

    while !shutdown.is_shutdown() {
        let started = Instant::now();
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = tokio::time::sleep(target) => {}
        }

        let sample = SchedulingSample {
            requested: target,
            elapsed: started.elapsed(),
        };
        ticks += 1;
        info!("{}", sample);
    }

    ticks
}
