//! Error types for dbstress.

use std::time::Duration;

use thiserror::Error;

/// The main error type for store, seeding and orchestration failures.
#[derive(Debug, Error)]
pub enum StressError {
    /// A store operation failed on the database side.
    #[error("Database error: {0}")]
    Database(String),

    /// Could not open or acquire a connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The operation outlived its command timeout.
    #[error("Operation timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The baseline dataset could not be established.
    #[error("Seeding failed: {0}")]
    Seed(String),

    /// Shutdown was signalled before the baseline dataset was in place.
    #[error("Cancelled before seeding completed")]
    Cancelled,

    /// A spawned activity panicked or was aborted.
    #[error("Task error: {0}")]
    Task(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StressError {
    /// Wrap any displayable driver error as a database error.
    pub fn database(err: impl std::fmt::Display) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<tokio::task::JoinError> for StressError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}

/// Result type alias for dbstress operations.
pub type StressResult<T> = Result<T, StressError>;

/// Failure to locate or read the driver's timer queue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntrospectionError {
    /// The process-wide timer queue has not been created.
    #[error("timer queue singleton is not installed")]
    NotInstalled,

    /// The timer queue exists but a field could not be read or is
    /// inconsistent with the pending entries.
    #[error("cannot read timer queue field '{field}': {reason}")]
    Field { field: &'static str, reason: String },
}
