//! In-process backend, selected with a `memory://` URL.
//!
//! Useful for driving the scheduler and timer-queue machinery without a
//! database. Failures can be injected with [`MemoryRecordStore::fail_next`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::timer_queue::TimerQueue;
use super::{Record, RecordStore};
use crate::error::{StressError, StressResult};

pub struct MemoryRecordStore {
    records: RwLock<BTreeMap<i64, String>>,
    pending_failures: AtomicU32,
    list_calls: AtomicU64,
    timers: &'static TimerQueue,
    command_timeout: Duration,
}

impl MemoryRecordStore {
    pub fn new(command_timeout: Duration) -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            pending_failures: AtomicU32::new(0),
            list_calls: AtomicU64::new(0),
            timers: TimerQueue::global(),
            command_timeout,
        }
    }

    /// Make the next `n` operations fail.
    pub fn fail_next(&self, n: u32) {
        self.pending_failures.store(n, Ordering::Release);
    }

    /// Number of `list_ordered` calls, successful or not.
    pub fn list_calls(&self) -> u64 {
        self.list_calls.load(Ordering::Acquire)
    }

    async fn begin(&self) -> StressResult<()> {
        // stand-in for the network round trip
        tokio::task::yield_now().await;

        let injected = self
            .pending_failures
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StressError::Database("injected failure".to_string()));
        }
        Ok(())
    }
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn ensure_schema(&self) -> StressResult<()> {
        self.timers
            .watch(self.command_timeout, self.begin())
            .await
    }

    async fn insert_if_absent(&self, id: i64, value: &str) -> StressResult<bool> {
        self.timers
            .watch(self.command_timeout, async {
                self.begin().await?;
                let mut records = self.records.write().await;
                if records.contains_key(&id) {
                    return Ok(false);
                }
                records.insert(id, value.to_string());
                Ok(true)
            })
            .await
    }

    async fn list_ordered(&self, limit: usize) -> StressResult<Vec<Record>> {
        self.list_calls.fetch_add(1, Ordering::AcqRel);
        self.timers
            .watch(self.command_timeout, async {
                self.begin().await?;
                let records = self.records.read().await;
                Ok(records
                    .iter()
                    .take(limit)
                    .map(|(id, value)| Record::new(*id, value.clone()))
                    .collect())
            })
            .await
    }

    async fn delete_all(&self) -> StressResult<u64> {
        self.timers
            .watch(self.command_timeout, async {
                self.begin().await?;
                let mut records = self.records.write().await;
                let removed = records.len() as u64;
                records.clear();
                Ok(removed)
            })
            .await
    }

    async fn count(&self) -> StressResult<u64> {
        self.timers
            .watch(self.command_timeout, async {
                self.begin().await?;
                Ok(self.records.read().await.len() as u64)
            })
            .await
    }
}
