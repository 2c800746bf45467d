//! Driver-side timeout bookkeeping.
//!
//! Every store operation registers a watchdog entry before it starts and
//! removes it when it finishes or times out. The queue is a process-wide
//! singleton shared by every connection. Pending entries live in a keyed
//! container; its length is mirrored into an atomic, and a wrapping counter
//! records how many entries have left the queue since the process started.
//!
//! The container is only locked by `add` and by entries leaving the queue.
//! [`TimerQueue::state`] reads the atomics and never takes the lock.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock, TryLockError};
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{IntrospectionError, StressError, StressResult};

static INSTANCE: OnceLock<TimerQueue> = OnceLock::new();

/// Pending per-operation timeouts.
#[derive(Debug, Default)]
pub struct TimerQueue {
    pending: Mutex<HashMap<u64, Instant>>,
    /// Mirror of `pending.len()`, written while the container is locked
    depth: AtomicUsize,
    counter: AtomicU32,
    next_id: AtomicU64,
}

/// Point-in-time view of the queue, read without locking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerQueueState {
    pub depth: usize,
    pub counter: u32,
}

/// Container length and its atomic mirror, read together under the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueAudit {
    pub pending: usize,
    pub mirror: usize,
}

impl QueueAudit {
    pub fn is_consistent(&self) -> bool {
        self.pending == self.mirror
    }
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide queue, created on first use.
    pub fn global() -> &'static TimerQueue {
        INSTANCE.get_or_init(TimerQueue::new)
    }

    /// The process-wide queue if some store has already created it.
    pub fn installed() -> Option<&'static TimerQueue> {
        INSTANCE.get()
    }

    /// Register a watchdog entry that expires `timeout` from now.
    pub fn add(&self, timeout: Duration) -> TimerEntry<'_> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now() + timeout;

        let mut pending = self.lock_pending();
        pending.insert(id, deadline);
        self.depth.store(pending.len(), Ordering::Release);
        drop(pending);

        TimerEntry {
            queue: self,
            id,
            deadline,
        }
    }

    pub fn len(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Completed entries, wrapping at `u32::MAX`.
    pub fn counter(&self) -> u32 {
        self.counter.load(Ordering::Acquire)
    }

    pub fn state(&self) -> TimerQueueState {
        TimerQueueState {
            depth: self.len(),
            counter: self.counter(),
        }
    }

    /// Compare the container with its mirror without waiting for the lock.
    ///
    /// `Ok(None)` when an operation holds the lock right now.
    pub fn try_audit(&self) -> Result<Option<QueueAudit>, IntrospectionError> {
        match self.pending.try_lock() {
            Ok(pending) => Ok(Some(QueueAudit {
                pending: pending.len(),
                mirror: self.depth.load(Ordering::Acquire),
            })),
            Err(TryLockError::WouldBlock) => Ok(None),
            Err(TryLockError::Poisoned(_)) => Err(IntrospectionError::Field {
                field: "pending",
                reason: "lock poisoned".to_string(),
            }),
        }
    }

    /// Entries whose deadline is at or before `now`.
    pub fn overdue(&self, now: Instant) -> usize {
        self.lock_pending()
            .values()
            .filter(|deadline| **deadline <= now)
            .count()
    }

    /// Run `operation` under a watchdog entry, failing with
    /// [`StressError::Timeout`] once the entry's deadline passes.
    pub async fn watch<T, F>(&self, timeout: Duration, operation: F) -> StressResult<T>
    where
        F: Future<Output = StressResult<T>>,
    {
        let entry = self.add(timeout);
        match tokio::time::timeout_at(entry.deadline(), operation).await {
            Ok(result) => result,
            Err(_) => Err(StressError::Timeout(timeout)),
        }
    }

    fn complete(&self, id: u64) {
        let mut pending = self.lock_pending();
        pending.remove(&id);
        self.depth.store(pending.len(), Ordering::Release);
        drop(pending);

        // fetch_add wraps on overflow
        self.counter.fetch_add(1, Ordering::AcqRel);
    }

    // bookkeeping must survive a panic elsewhere; the audit still reports it
    fn lock_pending(&self) -> MutexGuard<'_, HashMap<u64, Instant>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    #[cfg(test)]
    pub(crate) fn skew_mirror(&self, depth: usize) {
        self.depth.store(depth, Ordering::Release);
    }
}

/// A registered timeout. Leaves the queue when dropped.
#[derive(Debug)]
pub struct TimerEntry<'a> {
    queue: &'a TimerQueue,
    id: u64,
    deadline: Instant,
}

impl TimerEntry<'_> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

impl Drop for TimerEntry<'_> {
    fn drop(&mut self) {
        self.queue.complete(self.id);
    }
}
