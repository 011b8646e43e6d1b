//! Core scheduling primitives: pool, queue, handles, errors.

pub mod error;
pub mod handle;
pub mod invoker;
pub mod task_queue;
pub mod worker_pool;

pub use error::{AppResult, PoolError, TaskError};
pub use handle::TaskHandle;
pub use invoker::{invoker_fn, FnInvoker, Invoker};
pub use task_queue::{PendingEntry, TaskQueue};
pub use worker_pool::{PoolStats, WorkerPool};
