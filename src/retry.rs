//! Bounded retry around single storage statements.
//!
//! A statement that fails because the database is busy or locked is retried
//! after `step × n²` for attempt `n = 1..=max_retries`. Uniqueness violations
//! are semantic outcomes (duplicate work, marker already held) and surface on
//! the first attempt. Everything else is a hard storage error.
//!
//! ```
//! use std::time::Duration;
//! use lowq::retry::RetryPolicy;
//!
//! let policy = RetryPolicy::default();
//! assert_eq!(policy.wait(1), Duration::from_millis(100));
//! assert_eq!(policy.wait(20), Duration::from_secs(40));
//! ```

use std::time::Duration;

use opentelemetry::KeyValue;
use rusqlite::ErrorCode;
use tracing::warn;

use crate::error::{Error, Result};
use crate::telemetry::metrics;

/// Number of attempts before a busy store is treated as unavailable.
pub const MAX_RETRIES: u32 = 20;

/// Base unit of the quadratic backoff.
pub const BACKOFF_STEP: Duration = Duration::from_millis(100);

/// Retry policy for transient storage failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts made before giving up.
    pub max_retries: u32,
    /// Backoff unit; attempt `n` waits `step × n²`.
    pub step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            step: BACKOFF_STEP,
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (1-indexed).
    pub fn wait(&self, attempt: u32) -> Duration {
        self.step.saturating_mul(attempt.saturating_mul(attempt))
    }

    /// Worst-case total time spent sleeping before giving up.
    pub fn worst_case(&self) -> Duration {
        (1..=self.max_retries).map(|n| self.wait(n)).sum()
    }

    /// Run `op`, retrying transient failures with a blocking sleep.
    pub fn execute<T, F>(&self, statement: &'static str, op: F) -> Result<T>
    where
        F: FnMut() -> rusqlite::Result<T>,
    {
        self.execute_with(statement, op, std::thread::sleep)
    }

    /// Run `op`, retrying transient failures and waiting through `sleep`.
    pub fn execute_with<T, F, S>(&self, statement: &'static str, mut op: F, mut sleep: S) -> Result<T>
    where
        F: FnMut() -> rusqlite::Result<T>,
        S: FnMut(Duration),
    {
        let mut attempt = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if is_transient(&e) => {
                    attempt += 1;
                    let wait = self.wait(attempt);
                    warn!(
                        statement,
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        error = %e,
                        "storage busy, retrying"
                    );
                    metrics::storage_retries().add(1, &[KeyValue::new("statement", statement)]);
                    sleep(wait);
                    if attempt >= self.max_retries {
                        return Err(Error::Busy {
                            attempts: attempt,
                            source: e,
                        });
                    }
                }
                Err(e) if is_constraint_violation(&e) => return Err(Error::Constraint(e)),
                Err(e) => return Err(Error::Storage(e)),
            }
        }
    }
}

/// Busy or locked: another connection holds a conflicting lock.
pub fn is_transient(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

/// A UNIQUE (or other) constraint rejected the statement.
pub fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}
