//! # dbstress — diagnostic load generator
//!
//! Seeds a records table, then keeps hundreds of concurrent readers busy
//! against it while two monitors sample the health of the client side:
//!
//! | Activity            | Reports                                           |
//! |---------------------|---------------------------------------------------|
//! | Poller pool         | `<worker>: Listed <n> times`, ignored failures     |
//! | Scheduling monitor  | `Scheduling delay was <ms>`                        |
//! | Timer-queue monitor | queue depth, completion rate, previous counter    |
//!
//! Starvation of the runtime shows up as a growing scheduling delay; a
//! driver leaking timeout bookkeeping shows up as a timer queue that only
//! ever grows.
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use dbstress::prelude::*;
//!
//! let config = Config::default();
//! let store = dbstress::store::open(&config).await?;
//! let (notify, _) = tokio::sync::broadcast::channel(1);
//!
//! // runs until `notify` fires
//! let summary = dbstress::run(&config, store, DriverTimerQueueProbe::locate, notify).await?;
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod monitor;
pub mod orchestrator;
pub mod poller;
pub mod seeder;
pub mod shutdown;
pub mod store;

pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::*;
    pub use crate::monitor::{DriverTimerQueueProbe, TimerQueueOutcome, TimerQueueProbe};
    pub use crate::orchestrator::RunSummary;
    pub use crate::poller::PollerState;
    pub use crate::seeder::SeedReport;
    pub use crate::shutdown::Shutdown;
    pub use crate::store::{MemoryRecordStore, Record, RecordStore, SqlRecordStore};
}

pub use orchestrator::run;
