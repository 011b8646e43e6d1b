//! Error types for pool and queue operations.

use std::time::Duration;

use thiserror::Error;

/// Terminal failure of a single submitted task.
///
/// Exactly one terminal outcome occurs per task handle; the three variants
/// here cover the non-success outcomes. `Clone` so a settled failure can be
/// observed by multiple waiters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The invoker returned an error (message flattened from the source).
    #[error("task failed: {0}")]
    Failed(String),
    /// The task exceeded its queue's configured deadline.
    #[error("task timed out")]
    TimedOut,
    /// The task was cancelled before it could complete.
    #[error("task cancelled")]
    Cancelled,
}

impl From<anyhow::Error> for TaskError {
    fn from(err: anyhow::Error) -> Self {
        Self::Failed(format!("{err:#}"))
    }
}

/// Errors produced by pool-level operations.
#[derive(Debug, Error)]
pub enum PoolError {
    /// A task settled with a failure that is being re-raised to the caller.
    #[error(transparent)]
    Task(#[from] TaskError),
    /// A bulk invocation (`invoke_all`/`invoke_any`) deadline elapsed with
    /// insufficient completions.
    #[error("bulk invocation timed out after {0:?}")]
    BulkTimeout(Duration),
    /// The pool has been shut down and accepts no further work.
    #[error("pool has been shut down")]
    Shutdown,
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Internal error (worker thread panic, channel closed, etc.).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
