//! Record store client.
//!
//! The workload only needs a handful of operations from the backend, so they
//! sit behind the [`RecordStore`] trait. Each call is independent and the
//! client never holds a connection between calls. Callers see a failure once
//! the backend gives up: the SQL backend retries transient driver errors
//! per its [`RetryPolicy`], the in-process backend never does.
//!
//! Every implementation runs its operations under the driver's
//! [`TimerQueue`], which is what the timer-queue monitor samples.

mod memory;
pub mod retry;
mod sql;
pub mod timer_queue;

pub use memory::MemoryRecordStore;
pub use retry::RetryPolicy;
pub use sql::SqlRecordStore;
pub use timer_queue::{QueueAudit, TimerEntry, TimerQueue, TimerQueueState};

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{Config, MEMORY_URL};
use crate::error::StressResult;

/// A seeded row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub id: i64,
    pub value: String,
}

impl Record {
    pub fn new(id: i64, value: impl Into<String>) -> Self {
        Self {
            id,
            value: value.into(),
        }
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Create the records table if it does not exist.
    async fn ensure_schema(&self) -> StressResult<()>;

    /// Insert unless a record with `id` exists. Returns whether it inserted.
    async fn insert_if_absent(&self, id: i64, value: &str) -> StressResult<bool>;

    /// Up to `limit` records in ascending id order.
    async fn list_ordered(&self, limit: usize) -> StressResult<Vec<Record>>;

    /// Remove every record, returning how many were removed.
    async fn delete_all(&self) -> StressResult<u64>;

    async fn count(&self) -> StressResult<u64>;
}

/// Open the backend selected by the configured connection URL.
pub async fn open(config: &Config) -> StressResult<Arc<dyn RecordStore>> {
    let url = config.connection_url();
    if url.starts_with(MEMORY_URL) {
        tracing::info!("Using in-process record store");
        return Ok(Arc::new(MemoryRecordStore::new(config.command_timeout())));
    }

    let store = SqlRecordStore::connect(&url, config).await?;
    Ok(Arc::new(store))
}
