//! Diagnostic monitors that run alongside the poller pool.

pub mod scheduling;
pub mod timer_queue;

pub use scheduling::{SchedulingSample, run_scheduling_monitor};
pub use timer_queue::{
    DriverTimerQueueProbe, MonitorState, TimerQueueMonitor, TimerQueueOutcome, TimerQueueProbe,
    TimerQueueReport, TimerQueueSnapshot, completion_rate, failure_line, run_timer_queue_monitor,
};
