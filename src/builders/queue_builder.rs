//! Builder producing configured task queues.
//!
//! Queue configuration is fixed at construction: once tasks are in flight
//! there is no shared mutable configuration to race on. Only the blocked
//! flag remains runtime-togglable, via [`TaskQueue::set_blocked`].

use std::sync::Arc;
use std::time::Duration;

use crate::core::error::TaskError;
use crate::core::invoker::Invoker;
use crate::core::task_queue::{FailureHandler, TaskQueue};
use crate::core::worker_pool::WorkerPool;

/// Builder for a [`TaskQueue`], obtained from
/// [`WorkerPool::new_queue`].
///
/// ```rust,ignore
/// let queue = pool
///     .new_queue(invoker_fn(|n: i32| Ok(n * 10)), 4)
///     .with_timeout(Duration::from_secs(30))
///     .with_failure_handler(|err| tracing::warn!(%err, "task failed"))
///     .build();
/// ```
pub struct QueueBuilder<P, R> {
    pool: WorkerPool,
    invoker: Arc<dyn Invoker<P, R>>,
    capacity: usize,
    timeout: Option<Duration>,
    failure_handler: Option<FailureHandler>,
    blocked: bool,
}

impl<P, R> QueueBuilder<P, R>
where
    P: Clone + PartialEq + Send + 'static,
    R: Send + 'static,
{
    pub(crate) fn new(pool: WorkerPool, invoker: Arc<dyn Invoker<P, R>>, capacity: usize) -> Self {
        Self {
            pool,
            invoker,
            capacity,
            timeout: None,
            failure_handler: None,
            blocked: false,
        }
    }

    /// Per-task deadline. Default: unbounded.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Side-channel notification invoked exactly once per failed or
    /// timed-out task, before the task's handle resolves. Default: none.
    ///
    /// The handler runs on a worker or timer thread while the settling
    /// handle's lock is held; it must be quick and must not call back into
    /// the queue. Handler errors are not escalated.
    #[must_use]
    pub fn with_failure_handler(
        mut self,
        handler: impl Fn(&TaskError) + Send + Sync + 'static,
    ) -> Self {
        self.failure_handler = Some(Arc::new(handler));
        self
    }

    /// Initial intake state. A blocked queue silently drops `enqueue` calls
    /// until unblocked. Default: accepting.
    #[must_use]
    pub fn blocked(mut self, blocked: bool) -> Self {
        self.blocked = blocked;
        self
    }

    /// Finish construction.
    #[must_use]
    pub fn build(self) -> TaskQueue<P, R> {
        TaskQueue::from_parts(
            self.pool,
            self.invoker,
            self.capacity,
            self.timeout,
            self.failure_handler,
            self.blocked,
        )
    }
}
