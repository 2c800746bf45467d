//! Bounded retry for transient SQL failures.
//!
//! A failed operation is retried up to `max_retries` times with exponential
//! backoff capped at `max_delay`. Only errors the classifier marks transient
//! are retried; everything else is returned on the first failure. The whole
//! loop runs inside the operation's timer-queue entry, so the command
//! timeout bounds the retries as well.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::config::Config;

/// Delay before the first retry; doubles for each one after.
pub const BASE_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, max_delay: Duration) -> Self {
        Self {
            max_retries,
            max_delay,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.max_retries, config.max_retry_delay())
    }

    /// Backoff before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        // 2^20 is far past any sane cap
        let exponent = attempt.saturating_sub(1).min(20);
        BASE_DELAY
            .saturating_mul(2u32.pow(exponent))
            .min(self.max_delay)
    }

    /// Run `operation` until it succeeds, fails permanently, or runs out of
    /// retries.
    pub async fn run<T, E, F, Fut>(
        &self,
        is_transient: impl Fn(&E) -> bool,
        mut operation: F,
    ) -> Result<T, E>
    where
        E: std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_retries && is_transient(&e) => {
                    attempt += 1;
                    let delay = self.delay(attempt);
                    warn!(
                        "Transient database failure (attempt {}/{}): {}. Retrying in {}ms",
                        attempt,
                        self.max_retries,
                        e,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Whether a driver error is worth another attempt: lost or unavailable
/// connections, deadlocks, and busy SQLite files.
pub fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => match db.code() {
            Some(code) => is_transient_code(&code),
            None => false,
        },
        _ => false,
    }
}

/// SQLSTATE class 08 (connection exception) and 40001 (deadlock or
/// serialization failure) from MySQL; `SQLITE_BUSY` and `SQLITE_LOCKED`.
fn is_transient_code(code: &str) -> bool {
    code.starts_with("08") || matches!(code, "40001" | "5" | "6")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    enum FakeError {
        Transient,
        Fatal,
    }

    impl std::fmt::Display for FakeError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    fn transient(e: &FakeError) -> bool {
        matches!(e, FakeError::Transient)
    }

    #[test]
    fn test_delay_doubles_up_to_cap() {
        let policy = RetryPolicy::new(3, Duration::from_secs(5));
        assert_eq!(policy.delay(1), Duration::from_secs(1));
        assert_eq!(policy.delay(2), Duration::from_secs(2));
        assert_eq!(policy.delay(3), Duration::from_secs(4));
        assert_eq!(policy.delay(4), Duration::from_secs(5));
        assert_eq!(policy.delay(64), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let policy = RetryPolicy::new(3, Duration::from_secs(5));
        let calls = &AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let value = policy
            .run(transient, move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(FakeError::Transient)
                } else {
                    Ok(42)
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s + 2s of backoff
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_bounded() {
        let policy = RetryPolicy::new(3, Duration::from_secs(5));
        let calls = &AtomicU32::new(0);

        let result: Result<(), _> = policy
            .run(transient, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(FakeError::Transient)
            })
            .await;

        assert!(matches!(result, Err(FakeError::Transient)));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_is_not_retried() {
        let policy = RetryPolicy::new(3, Duration::from_secs(5));
        let calls = &AtomicU32::new(0);

        let result: Result<(), _> = policy
            .run(transient, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(FakeError::Fatal)
            })
            .await;

        assert!(matches!(result, Err(FakeError::Fatal)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_driver_error_classification() {
        assert!(is_transient(&sqlx::Error::PoolTimedOut));
        assert!(is_transient(&sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset"
        ))));
        assert!(!is_transient(&sqlx::Error::RowNotFound));
        assert!(!is_transient(&sqlx::Error::PoolClosed));

        assert!(is_transient_code("08S01"));
        assert!(is_transient_code("40001"));
        assert!(is_transient_code("5"));
        assert!(!is_transient_code("23000"));
        assert!(!is_transient_code("42S02"));
    }
}
