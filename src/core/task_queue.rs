//! Bounded per-queue admission control in front of the worker pool.
//!
//! A [`TaskQueue`] gates how many of *its own* submissions may be outstanding
//! at once, tracks every submission's handle in call order, and exposes
//! blocking drain operations. Many queues may share one pool; their admission
//! limits are mutually independent.
//!
//! Admission slots are keyed by a queue-local submission id rather than by
//! param equality, so settlement is unambiguous even when two outstanding
//! params compare equal.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::core::error::{PoolError, TaskError};
use crate::core::handle::TaskHandle;
use crate::core::invoker::Invoker;
use crate::core::worker_pool::WorkerPool;

/// Callback notified once per failed or timed-out task.
pub(crate) type FailureHandler = Arc<dyn Fn(&TaskError) + Send + Sync>;

struct GateInner<P> {
    /// Outstanding submissions: `(submission_id, param)`, in admission order.
    entries: Vec<(u64, P)>,
    capacity: usize,
}

/// Bounded multiset of outstanding submissions. Producers block on `freed`
/// when the gate is full; settlement callbacks release slots from worker and
/// timer threads.
pub(crate) struct AdmissionGate<P> {
    inner: Mutex<GateInner<P>>,
    freed: Condvar,
}

impl<P: PartialEq> AdmissionGate<P> {
    fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(GateInner {
                entries: Vec::with_capacity(capacity),
                capacity,
            }),
            freed: Condvar::new(),
        }
    }

    /// Block until a slot is free, then occupy it.
    fn admit(&self, id: u64, param: P) {
        let mut inner = self.inner.lock();
        while inner.entries.len() >= inner.capacity {
            self.freed.wait(&mut inner);
        }
        inner.entries.push((id, param));
    }

    /// Release the slot held by submission `id`. No-op if the slot was
    /// already released (manual dequeue, drain).
    fn release_id(&self, id: u64) -> bool {
        let mut inner = self.inner.lock();
        if let Some(pos) = inner.entries.iter().position(|(entry_id, _)| *entry_id == id) {
            inner.entries.remove(pos);
            drop(inner);
            self.freed.notify_one();
            true
        } else {
            false
        }
    }

    /// Release the first (oldest) slot whose param is value-equal.
    fn release_param(&self, param: &P) -> bool {
        let mut inner = self.inner.lock();
        if let Some(pos) = inner.entries.iter().position(|(_, entry)| entry == param) {
            inner.entries.remove(pos);
            drop(inner);
            self.freed.notify_one();
            true
        } else {
            false
        }
    }

    /// Drop every slot and wake all blocked producers.
    fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        drop(inner);
        self.freed.notify_all();
    }

    fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }
}

/// Bookkeeping record pairing a submitted param with its in-flight handle.
///
/// Never mutated after creation; removed only when the queue is drained.
pub struct PendingEntry<P, R> {
    /// The param this submission was enqueued with.
    pub param: P,
    /// Handle to the submission's eventual outcome.
    pub handle: TaskHandle<R>,
    /// Queue-local submission id keying the admission slot.
    pub(crate) submission: u64,
}

/// A bounded-capacity admission layer in front of a [`WorkerPool`].
///
/// `enqueue` blocks the producer when `capacity` submissions are outstanding;
/// completion, failure, timeout, and cancellation all free the slot. A drain
/// ([`TaskQueue::wait_for_results`] / [`TaskQueue::wait_for_termination`])
/// consumes the bookkeeping and leaves the queue empty and open at full
/// capacity, so the same instance can be reused for a fresh batch.
///
/// Built via [`WorkerPool::new_queue`] and
/// [`crate::builders::QueueBuilder`]; timeout and failure handler are fixed
/// at construction.
pub struct TaskQueue<P, R> {
    pool: WorkerPool,
    invoker: Arc<dyn Invoker<P, R>>,
    gate: Arc<AdmissionGate<P>>,
    pending: Mutex<Vec<PendingEntry<P, R>>>,
    timeout: Option<Duration>,
    failure_handler: Option<FailureHandler>,
    blocked: AtomicBool,
    next_submission: AtomicU64,
}

/// Settle a tracked handle, releasing its admission slot and notifying the
/// failure handler inside the settlement critical section. First settlement
/// wins; losers are no-ops. Cancellation never fires the failure handler.
fn settle_tracked<P, R>(
    handle: &TaskHandle<R>,
    gate: &AdmissionGate<P>,
    submission: u64,
    handler: Option<&FailureHandler>,
    outcome: Result<R, TaskError>,
) -> bool
where
    P: PartialEq,
{
    handle.settle_with(outcome, |outcome| {
        gate.release_id(submission);
        if let Err(err) = outcome {
            if !matches!(err, TaskError::Cancelled) {
                if let Some(handler) = handler {
                    handler(err);
                }
            }
        }
    })
}

impl<P, R> TaskQueue<P, R>
where
    P: Clone + PartialEq + Send + 'static,
    R: Send + 'static,
{
    pub(crate) fn from_parts(
        pool: WorkerPool,
        invoker: Arc<dyn Invoker<P, R>>,
        capacity: usize,
        timeout: Option<Duration>,
        failure_handler: Option<FailureHandler>,
        blocked: bool,
    ) -> Self {
        Self {
            pool,
            invoker,
            gate: Arc::new(AdmissionGate::new(capacity.max(1))),
            pending: Mutex::new(Vec::new()),
            timeout,
            failure_handler,
            blocked: AtomicBool::new(blocked),
            next_submission: AtomicU64::new(0),
        }
    }

    /// Submit `param` to this queue's invoker.
    ///
    /// Blocks the calling thread while the queue already has `capacity`
    /// submissions outstanding; a prior settlement frees the slot. When the
    /// queue is blocked via [`TaskQueue::set_blocked`], returns immediately
    /// without effect.
    ///
    /// # Errors
    ///
    /// [`PoolError::Shutdown`] if the underlying pool no longer accepts
    /// work.
    pub fn enqueue(&self, param: P) -> Result<(), PoolError> {
        if self.blocked.load(Ordering::Acquire) {
            debug!("queue is blocked, dropping submission");
            return Ok(());
        }
        if self.pool.is_shutdown() {
            return Err(PoolError::Shutdown);
        }

        let submission = self.next_submission.fetch_add(1, Ordering::Relaxed);
        self.gate.admit(submission, param.clone());

        let handle = TaskHandle::new();

        // Race the task against the queue deadline. The watchdog runs on the
        // pool's timer thread so it fires even when every worker is busy.
        if let Some(timeout) = self.timeout {
            let watchdog = handle.clone();
            let gate = Arc::clone(&self.gate);
            let handler = self.failure_handler.clone();
            let armed = self.pool.schedule_inline(
                Instant::now() + timeout,
                Box::new(move || {
                    if settle_tracked(&watchdog, &gate, submission, handler.as_ref(), Err(TaskError::TimedOut)) {
                        warn!(submission, "task timed out");
                    }
                }),
            );
            if let Err(err) = armed {
                self.gate.release_id(submission);
                handle.cancel();
                return Err(err);
            }
        }

        let task_handle = handle.clone();
        let gate = Arc::clone(&self.gate);
        let handler = self.failure_handler.clone();
        let invoker = Arc::clone(&self.invoker);
        let task_param = param.clone();
        let dispatched = self.pool.dispatch(Box::new(move |rt| {
            if task_handle.is_settled() {
                debug!(submission, "task settled before start, skipping");
                return;
            }
            let (outcome, panic) =
                match catch_unwind(AssertUnwindSafe(|| rt.block_on(invoker.invoke(task_param)))) {
                    Ok(Ok(value)) => (Ok(value), None),
                    Ok(Err(err)) => (Err(TaskError::from(err)), None),
                    Err(payload) => (
                        Err(TaskError::Failed("invoker panicked".into())),
                        Some(payload),
                    ),
                };
            settle_tracked(&task_handle, &gate, submission, handler.as_ref(), outcome);
            if let Some(payload) = panic {
                std::panic::resume_unwind(payload);
            }
        }));
        if let Err(err) = dispatched {
            self.gate.release_id(submission);
            handle.cancel();
            return Err(err);
        }

        self.pending.lock().push(PendingEntry {
            param,
            handle,
            submission,
        });
        Ok(())
    }

    /// Manually release one admission slot whose param is value-equal to
    /// `param`, without touching bookkeeping.
    ///
    /// The oldest matching slot is released (FIFO first-match). When the
    /// matching submission later settles, its own release finds the slot
    /// gone and no-ops. Returns whether a slot was released.
    pub fn dequeue(&self, param: &P) -> bool {
        self.gate.release_param(param)
    }

    /// Block until every recorded handle has settled and return the
    /// successful results in submission order.
    ///
    /// With `ignore_failures` set, failed and timed-out entries are omitted
    /// from the output (not substituted). Otherwise the first failure in
    /// bookkeeping order is re-raised and remaining handles are not waited
    /// upon.
    ///
    /// In all cases the drain consumes the bookkeeping and clears the
    /// admission gate: the queue ends empty, producers blocked on it are
    /// released, and settlements of still-running tasks become untracked
    /// no-ops.
    ///
    /// # Errors
    ///
    /// [`PoolError::Task`] re-raising the first failure when
    /// `ignore_failures` is false.
    pub fn wait_for_results(&self, ignore_failures: bool) -> Result<Vec<R>, PoolError> {
        let entries: Vec<PendingEntry<P, R>> = std::mem::take(&mut *self.pending.lock());
        debug!(tracked = entries.len(), "draining queue");

        let mut results = Vec::with_capacity(entries.len());
        let mut first_failure = None;
        for entry in entries {
            match entry.handle.wait() {
                Ok(value) => results.push(value),
                Err(err) if ignore_failures => {
                    debug!(submission = entry.submission, error = %err, "omitting failed task from results");
                }
                Err(err) => {
                    first_failure = Some(err);
                    break;
                }
            }
        }

        // Whatever the outcome, the drain leaves the queue empty and at full
        // capacity.
        self.gate.clear();

        match first_failure {
            Some(err) => Err(PoolError::Task(err)),
            None => Ok(results),
        }
    }

    /// Identical settlement semantics to [`TaskQueue::wait_for_results`],
    /// discarding the results. For fire-and-forget batches.
    ///
    /// # Errors
    ///
    /// [`PoolError::Task`] re-raising the first failure when
    /// `ignore_failures` is false.
    pub fn wait_for_termination(&self, ignore_failures: bool) -> Result<(), PoolError> {
        self.wait_for_results(ignore_failures).map(|_| ())
    }

    /// Cancel every tracked handle that has not yet settled, best-effort.
    ///
    /// Settled handles are unaffected; cancelled slots are released but the
    /// failure handler is not invoked. Bookkeeping is kept - callers
    /// typically follow with a drain, where cancelled entries surface as
    /// [`TaskError::Cancelled`]. Idempotent, and a no-op on an empty queue.
    pub fn cancel_all(&self) {
        let targets: Vec<(u64, TaskHandle<R>)> = self
            .pending
            .lock()
            .iter()
            .map(|entry| (entry.submission, entry.handle.clone()))
            .collect();

        let mut cancelled = 0_usize;
        for (submission, handle) in targets {
            if settle_tracked(
                &handle,
                &self.gate,
                submission,
                self.failure_handler.as_ref(),
                Err(TaskError::Cancelled),
            ) {
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            info!(cancelled, "cancelled outstanding tasks");
        }
    }

    /// Pause or resume intake. While blocked, [`TaskQueue::enqueue`] is a
    /// silent no-op; existing submissions and bookkeeping are untouched.
    pub fn set_blocked(&self, blocked: bool) {
        self.blocked.store(blocked, Ordering::Release);
    }

    /// Whether intake is currently paused.
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::Acquire)
    }

    /// Snapshot the tracked submissions, in submission order.
    ///
    /// Each entry pairs the enqueued param with a clone of its handle, so a
    /// caller can wait on or cancel an individual submission without
    /// draining the whole queue.
    #[must_use]
    pub fn pending(&self) -> Vec<PendingEntry<P, R>> {
        self.pending
            .lock()
            .iter()
            .map(|entry| PendingEntry {
                param: entry.param.clone(),
                handle: entry.handle.clone(),
                submission: entry.submission,
            })
            .collect()
    }

    /// Number of tracked submissions since the last drain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Whether no submissions are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Number of submissions currently holding an admission slot.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.gate.len()
    }
}
