//! Worker pool with dedicated OS threads and a shared timer thread.
//!
//! The pool owns no per-queue state; [`crate::core::TaskQueue`]s are built on
//! top of it and share its workers. Each worker thread owns a single-threaded
//! tokio runtime so queue invokers can be async without the pool depending on
//! an ambient runtime.
//!
//! # Design Principles
//!
//! - **No polling**: workers block on channel recv; delayed work parks on a
//!   Condvar until its deadline
//! - **Clean shutdown**: dropping the task sender unblocks idle workers
//! - **Panic isolation**: a panicking job is contained and counted, the
//!   worker thread survives

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use crate::builders::QueueBuilder;
use crate::config::PoolConfig;
use crate::core::error::{AppResult, PoolError, TaskError};
use crate::core::handle::TaskHandle;
use crate::core::invoker::Invoker;

/// A unit of work executed on a worker thread. The worker passes in its own
/// runtime so jobs can `block_on` async invokers.
pub(crate) type Job = Box<dyn FnOnce(&tokio::runtime::Runtime) + Send + 'static>;

/// Wire format between the pool and its workers.
enum Message {
    /// Execute a job.
    Run(Job),
    /// Exit the receiving worker (used when shrinking the pool).
    Retire,
}

/// Statistics about pool utilization.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Worker threads currently alive.
    pub worker_count: usize,
    /// Jobs waiting in the dispatch channel.
    pub queued_tasks: usize,
    /// Delayed jobs and watchdogs not yet due.
    pub pending_timers: usize,
    /// Total jobs handed to the pool.
    pub submitted_tasks: u64,
    /// Total jobs a worker ran to completion.
    pub completed_tasks: u64,
    /// Total jobs that panicked (the panic was isolated).
    pub failed_tasks: u64,
}

/// Internal counters (lock-free atomics).
#[derive(Debug, Default)]
struct PoolCounters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

/// What the timer thread does with a due entry.
enum TimerAction {
    /// Hand the job to a worker through the dispatch channel. `abandon`
    /// settles the job's handle when the pool shuts down before the job can
    /// be dispatched, so no waiter is left blocked on a job that will never
    /// run.
    Dispatch {
        job: Job,
        abandon: Box<dyn FnOnce() + Send + 'static>,
    },
    /// Run the callback on the timer thread itself. Reserved for cheap
    /// settlement work (timeout watchdogs) that must fire even when every
    /// worker is busy.
    Inline(Box<dyn FnOnce() + Send + 'static>),
}

/// Heap entry ordered by deadline, then by insertion sequence.
struct TimerEntry {
    due: Instant,
    seq: u64,
    action: TimerAction,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    // Reversed so the earliest deadline surfaces at the heap root.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct TimerState {
    heap: BinaryHeap<TimerEntry>,
    shutdown: bool,
}

/// Core and maximum worker counts, adjusted at runtime.
struct Sizing {
    core: usize,
    max: usize,
}

struct PoolShared {
    /// Task sender (to workers). `None` once shutdown has begun.
    task_tx: Mutex<Option<Sender<Message>>>,
    /// Kept so resize can hand new workers their own receiver.
    task_rx: Receiver<Message>,
    counters: Arc<PoolCounters>,
    live_workers: Arc<AtomicUsize>,
    next_worker_id: AtomicUsize,
    /// Timer state shared with the timer thread (separate Arc so the thread
    /// does not keep the pool itself alive).
    timer: Arc<Mutex<TimerState>>,
    timer_wake: Arc<Condvar>,
    timer_seq: AtomicU64,
    timer_thread: Mutex<Option<JoinHandle<()>>>,
    sizing: Mutex<Sizing>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: AtomicBool,
    stack_size: usize,
}

impl Drop for PoolShared {
    fn drop(&mut self) {
        // Signal shutdown but do not join here; explicit shutdown() is
        // required for graceful cleanup.
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            *self.task_tx.get_mut() = None;
            self.timer.lock().shutdown = true;
            self.timer_wake.notify_all();
            debug!("worker pool dropped without explicit shutdown; workers will be detached");
        }
    }
}

/// A shared pool of OS worker threads with immediate, delayed, and bulk
/// invocation.
///
/// Cloning is cheap; all clones drive the same pool. The pool is constructed
/// explicitly and passed to every queue built on it - there is no process
/// global. Call [`WorkerPool::shutdown`] at teardown to join the workers.
#[derive(Clone)]
pub struct WorkerPool {
    shared: Arc<PoolShared>,
}

impl WorkerPool {
    /// Create a pool, spawning `config.worker_count` worker threads plus one
    /// timer thread.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidConfig`] if the configuration is invalid.
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        config.validate().map_err(PoolError::InvalidConfig)?;

        let worker_count = config.worker_count;
        let max_workers = config.max_workers.unwrap_or(worker_count);

        let (task_tx, task_rx) = unbounded::<Message>();
        let counters = Arc::new(PoolCounters::default());
        let live_workers = Arc::new(AtomicUsize::new(0));
        let timer = Arc::new(Mutex::new(TimerState {
            heap: BinaryHeap::new(),
            shutdown: false,
        }));
        let timer_wake = Arc::new(Condvar::new());

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            live_workers.fetch_add(1, Ordering::Relaxed);
            workers.push(spawn_worker(
                worker_id,
                task_rx.clone(),
                Arc::clone(&counters),
                Arc::clone(&live_workers),
                config.thread_stack_size,
            ));
        }

        let timer_thread = spawn_timer(Arc::clone(&timer), Arc::clone(&timer_wake), task_tx.clone());

        info!(
            worker_count,
            max_workers,
            stack_size = config.thread_stack_size,
            "worker pool initialized"
        );

        Ok(Self {
            shared: Arc::new(PoolShared {
                task_tx: Mutex::new(Some(task_tx)),
                task_rx,
                counters,
                live_workers,
                next_worker_id: AtomicUsize::new(worker_count),
                timer,
                timer_wake,
                timer_seq: AtomicU64::new(0),
                timer_thread: Mutex::new(Some(timer_thread)),
                sizing: Mutex::new(Sizing {
                    core: worker_count,
                    max: max_workers,
                }),
                workers: Mutex::new(workers),
                shutdown: AtomicBool::new(false),
                stack_size: config.thread_stack_size,
            }),
        })
    }

    /// Whether shutdown has begun.
    pub(crate) fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    /// Hand a raw job to the workers. Never blocks; the dispatch channel is
    /// unbounded because admission control lives in the queues.
    pub(crate) fn dispatch(&self, job: Job) -> Result<(), PoolError> {
        if self.is_shutdown() {
            return Err(PoolError::Shutdown);
        }
        let guard = self.shared.task_tx.lock();
        let Some(task_tx) = guard.as_ref() else {
            return Err(PoolError::Shutdown);
        };
        task_tx
            .send(Message::Run(job))
            .map_err(|_| PoolError::Shutdown)?;
        self.shared.counters.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Register a timer entry and wake the timer thread.
    fn schedule(&self, due: Instant, action: TimerAction) -> Result<(), PoolError> {
        if self.is_shutdown() {
            return Err(PoolError::Shutdown);
        }
        let seq = self.shared.timer_seq.fetch_add(1, Ordering::Relaxed);
        let mut timer = self.shared.timer.lock();
        if timer.shutdown {
            return Err(PoolError::Shutdown);
        }
        timer.heap.push(TimerEntry { due, seq, action });
        drop(timer);
        self.shared.timer_wake.notify_one();
        Ok(())
    }

    /// Run `callback` on the timer thread at `due`.
    ///
    /// The callback must be cheap: it shares the thread with every other
    /// timer. Queues use this for timeout watchdogs so a deadline fires even
    /// when all workers are busy with long tasks.
    pub(crate) fn schedule_inline(
        &self,
        due: Instant,
        callback: Box<dyn FnOnce() + Send + 'static>,
    ) -> Result<(), PoolError> {
        self.schedule(due, TimerAction::Inline(callback))
    }

    /// Submit `f` for asynchronous execution. Never blocks the caller.
    ///
    /// Cancelling the returned handle before a worker picks the job up
    /// prevents execution; after that, cancellation is a losing settlement
    /// race and has no effect.
    ///
    /// # Errors
    ///
    /// [`PoolError::Shutdown`] if the pool no longer accepts work.
    pub fn invoke<R, F>(&self, f: F) -> Result<TaskHandle<R>, PoolError>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let handle = TaskHandle::new();
        let task_handle = handle.clone();
        self.dispatch(Box::new(move |_rt| {
            if task_handle.is_settled() {
                debug!("task settled before start, skipping");
                return;
            }
            match catch_unwind(AssertUnwindSafe(f)) {
                Ok(value) => {
                    task_handle.settle(Ok(value));
                }
                Err(payload) => {
                    // Settle waiters first, then let the worker's isolation
                    // layer record the panic.
                    task_handle.settle(Err(TaskError::Failed("task panicked".into())));
                    std::panic::resume_unwind(payload);
                }
            }
        }))?;
        Ok(handle)
    }

    /// Submit `f` to run no earlier than `delay` from now.
    ///
    /// The returned handle is cancellable; cancelling before the deadline
    /// prevents the job from running at all. If the pool shuts down before
    /// the deadline the job is discarded and its handle settles as
    /// [`TaskError::Cancelled`].
    ///
    /// # Errors
    ///
    /// [`PoolError::Shutdown`] if the pool no longer accepts work.
    pub fn invoke_after<R, F>(&self, f: F, delay: Duration) -> Result<TaskHandle<R>, PoolError>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let handle = TaskHandle::new();
        let task_handle = handle.clone();
        let job: Job = Box::new(move |_rt| {
            if task_handle.is_settled() {
                debug!("scheduled task cancelled before start");
                return;
            }
            match catch_unwind(AssertUnwindSafe(f)) {
                Ok(value) => {
                    task_handle.settle(Ok(value));
                }
                Err(payload) => {
                    task_handle.settle(Err(TaskError::Failed("task panicked".into())));
                    std::panic::resume_unwind(payload);
                }
            }
        });
        let abandoned = handle.clone();
        self.schedule(
            Instant::now() + delay,
            TimerAction::Dispatch {
                job,
                abandon: Box::new(move || {
                    abandoned.cancel();
                }),
            },
        )?;
        self.shared.counters.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(handle)
    }

    /// Submit a batch of independent tasks and block until all complete or
    /// `timeout` elapses. Results are returned in input order.
    ///
    /// Fail-fast: the first observed failure aborts waiting; started tasks
    /// are not forcibly stopped, not-yet-started ones are cancelled
    /// best-effort.
    ///
    /// # Errors
    ///
    /// - [`PoolError::Task`] re-raising the first failure
    /// - [`PoolError::BulkTimeout`] when the deadline passes with tasks still
    ///   pending
    /// - [`PoolError::Shutdown`] if the pool no longer accepts work
    pub fn invoke_all<R, F>(&self, tasks: Vec<F>, timeout: Duration) -> Result<Vec<R>, PoolError>
    where
        R: Send + 'static,
        F: FnOnce() -> AppResult<R> + Send + 'static,
    {
        let deadline = Instant::now() + timeout;
        let mut handles = Vec::with_capacity(tasks.len());
        for f in tasks {
            let handle = TaskHandle::new();
            let task_handle = handle.clone();
            self.dispatch(Box::new(move |_rt| {
                if task_handle.is_settled() {
                    return;
                }
                let (outcome, panic) = match catch_unwind(AssertUnwindSafe(f)) {
                    Ok(Ok(value)) => (Ok(value), None),
                    Ok(Err(err)) => (Err(TaskError::from(err)), None),
                    Err(payload) => (
                        Err(TaskError::Failed("task panicked".into())),
                        Some(payload),
                    ),
                };
                task_handle.settle(outcome);
                if let Some(payload) = panic {
                    std::panic::resume_unwind(payload);
                }
            }))?;
            handles.push(handle);
        }

        let mut results = Vec::with_capacity(handles.len());
        for (idx, handle) in handles.iter().enumerate() {
            match handle.wait_until(deadline) {
                Some(Ok(value)) => results.push(value),
                Some(Err(err)) => {
                    warn!(task = idx, error = %err, "bulk invocation failed, aborting wait");
                    for rest in &handles[idx + 1..] {
                        rest.cancel();
                    }
                    return Err(PoolError::Task(err));
                }
                None => {
                    warn!(task = idx, ?timeout, "bulk invocation timed out");
                    for rest in &handles[idx..] {
                        rest.cancel();
                    }
                    return Err(PoolError::BulkTimeout(timeout));
                }
            }
        }
        Ok(results)
    }

    /// Submit a batch of tasks and block until the first one succeeds,
    /// cancelling the rest best-effort.
    ///
    /// # Errors
    ///
    /// - [`PoolError::BulkTimeout`] when no task succeeds before the deadline
    /// - [`PoolError::Task`] when every task fails (the last failure is
    ///   surfaced)
    /// - [`PoolError::Shutdown`] if the pool no longer accepts work
    pub fn invoke_any<R, F>(&self, tasks: Vec<F>, timeout: Duration) -> Result<R, PoolError>
    where
        R: Send + 'static,
        F: FnOnce() -> AppResult<R> + Send + 'static,
    {
        if tasks.is_empty() {
            return Err(PoolError::Internal("invoke_any requires at least one task".into()));
        }

        struct RaceInner<R> {
            winner: Option<R>,
            failures: usize,
            last_error: Option<TaskError>,
        }
        struct Race<R> {
            inner: Mutex<RaceInner<R>>,
            done: Condvar,
        }

        let total = tasks.len();
        let race = Arc::new(Race {
            inner: Mutex::new(RaceInner {
                winner: None,
                failures: 0,
                last_error: None,
            }),
            done: Condvar::new(),
        });

        let mut handles: Vec<TaskHandle<()>> = Vec::with_capacity(total);
        for f in tasks {
            let handle = TaskHandle::new();
            let task_handle = handle.clone();
            let race = Arc::clone(&race);
            self.dispatch(Box::new(move |_rt| {
                if task_handle.is_settled() {
                    return;
                }
                let (outcome, panic) = match catch_unwind(AssertUnwindSafe(f)) {
                    Ok(Ok(value)) => (Ok(value), None),
                    Ok(Err(err)) => (Err(TaskError::from(err)), None),
                    Err(payload) => (
                        Err(TaskError::Failed("task panicked".into())),
                        Some(payload),
                    ),
                };
                match outcome {
                    Ok(value) => {
                        let mut inner = race.inner.lock();
                        if inner.winner.is_none() {
                            inner.winner = Some(value);
                            race.done.notify_all();
                        }
                        drop(inner);
                        task_handle.settle(Ok(()));
                    }
                    Err(err) => {
                        let mut inner = race.inner.lock();
                        inner.failures += 1;
                        inner.last_error = Some(err.clone());
                        if inner.failures == total {
                            race.done.notify_all();
                        }
                        drop(inner);
                        task_handle.settle(Err(err));
                    }
                }
                if let Some(payload) = panic {
                    std::panic::resume_unwind(payload);
                }
            }))?;
            handles.push(handle);
        }

        let deadline = Instant::now() + timeout;
        let mut inner = race.inner.lock();
        loop {
            if let Some(value) = inner.winner.take() {
                drop(inner);
                for handle in &handles {
                    handle.cancel();
                }
                return Ok(value);
            }
            if inner.failures == total {
                let err = inner
                    .last_error
                    .take()
                    .unwrap_or(TaskError::Failed("all tasks failed".into()));
                return Err(PoolError::Task(err));
            }
            if race.done.wait_until(&mut inner, deadline).timed_out()
                && inner.winner.is_none()
                && inner.failures < total
            {
                drop(inner);
                warn!(?timeout, "invoke_any timed out without a successful task");
                for handle in &handles {
                    handle.cancel();
                }
                return Err(PoolError::BulkTimeout(timeout));
            }
        }
    }

    /// Adjust the core worker count, clamped to `1..=max`.
    ///
    /// Growing spawns workers immediately; shrinking retires workers as they
    /// pick up the retire message. Running tasks are never interrupted.
    pub fn set_core_size(&self, n: usize) {
        let mut sizing = self.shared.sizing.lock();
        let target = n.clamp(1, sizing.max);
        let current = sizing.core;
        sizing.core = target;

        if target > current {
            for _ in current..target {
                self.spawn_additional_worker();
            }
        } else if target < current {
            self.retire_workers(current - target);
        }
        info!(from = current, to = target, "core pool size adjusted");
    }

    /// Adjust the maximum worker count (minimum 1), shrinking the core count
    /// if it now exceeds the maximum.
    pub fn set_max_size(&self, n: usize) {
        let mut sizing = self.shared.sizing.lock();
        sizing.max = n.max(1);
        if sizing.core > sizing.max {
            let excess = sizing.core - sizing.max;
            sizing.core = sizing.max;
            self.retire_workers(excess);
        }
        info!(max = sizing.max, "maximum pool size adjusted");
    }

    fn spawn_additional_worker(&self) {
        let worker_id = self.shared.next_worker_id.fetch_add(1, Ordering::Relaxed);
        self.shared.live_workers.fetch_add(1, Ordering::Relaxed);
        let worker = spawn_worker(
            worker_id,
            self.shared.task_rx.clone(),
            Arc::clone(&self.shared.counters),
            Arc::clone(&self.shared.live_workers),
            self.shared.stack_size,
        );
        self.shared.workers.lock().push(worker);
    }

    fn retire_workers(&self, count: usize) {
        let guard = self.shared.task_tx.lock();
        if let Some(task_tx) = guard.as_ref() {
            for _ in 0..count {
                if task_tx.send(Message::Retire).is_err() {
                    break;
                }
            }
        }
    }

    /// Construct a [`crate::core::TaskQueue`] builder against this pool.
    ///
    /// `capacity` bounds how many submissions from the new queue may be
    /// outstanding at once; it does not affect the pool's own thread count or
    /// other queues sharing the pool. A capacity of zero is treated as 1.
    pub fn new_queue<P, R, I>(&self, invoker: I, capacity: usize) -> QueueBuilder<P, R>
    where
        P: Clone + PartialEq + Send + 'static,
        R: Send + 'static,
        I: Invoker<P, R>,
    {
        QueueBuilder::new(self.clone(), Arc::new(invoker), capacity)
    }

    /// Get current pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let queued_tasks = self
            .shared
            .task_tx
            .lock()
            .as_ref()
            .map_or(0, crossbeam_channel::Sender::len);
        PoolStats {
            worker_count: self.shared.live_workers.load(Ordering::Relaxed),
            queued_tasks,
            pending_timers: self.shared.timer.lock().heap.len(),
            submitted_tasks: self.shared.counters.submitted.load(Ordering::Relaxed),
            completed_tasks: self.shared.counters.completed.load(Ordering::Relaxed),
            failed_tasks: self.shared.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Shut down the pool: stop accepting work, drop the dispatch channel to
    /// unblock idle workers, stop the timer thread, and join every worker.
    ///
    /// Blocks until in-flight tasks finish. Idempotent; later calls return
    /// immediately.
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("shutting down worker pool");

        {
            let mut task_tx = self.shared.task_tx.lock();
            *task_tx = None;
        }

        // The timer holds its own sender clone, so it must exit before the
        // channel disconnects for the workers.
        {
            let mut timer = self.shared.timer.lock();
            timer.shutdown = true;
        }
        self.shared.timer_wake.notify_all();
        if let Some(timer_thread) = self.shared.timer_thread.lock().take() {
            if timer_thread.join().is_err() {
                warn!("timer thread panicked during shutdown");
            }
        }

        let mut workers = self.shared.workers.lock();
        let worker_count = workers.len();
        for worker in workers.drain(..) {
            if worker.join().is_err() {
                warn!("worker panicked during shutdown");
            }
        }
        info!(worker_count, "worker pool shut down complete");
    }
}

/// Spawn a worker thread with its own single-threaded tokio runtime.
fn spawn_worker(
    worker_id: usize,
    task_rx: Receiver<Message>,
    counters: Arc<PoolCounters>,
    live_workers: Arc<AtomicUsize>,
    stack_size: usize,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name(format!("tg-worker-{worker_id}"))
        .stack_size(stack_size)
        .spawn(move || {
            debug!(worker_id, "worker thread started");

            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    error!(worker_id, error = %e, "failed to create worker runtime");
                    live_workers.fetch_sub(1, Ordering::Relaxed);
                    return;
                }
            };

            // Blocking recv, no polling. When the sender is dropped the recv
            // fails and the worker exits cleanly.
            loop {
                let message = match task_rx.recv() {
                    Ok(message) => message,
                    Err(_) => {
                        debug!(worker_id, "worker channel closed, exiting");
                        break;
                    }
                };
                match message {
                    Message::Retire => {
                        debug!(worker_id, "worker retired");
                        break;
                    }
                    Message::Run(job) => {
                        if catch_unwind(AssertUnwindSafe(|| job(&rt))).is_err() {
                            counters.failed.fetch_add(1, Ordering::Relaxed);
                            error!(worker_id, "job panicked");
                        } else {
                            counters.completed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            }

            live_workers.fetch_sub(1, Ordering::Relaxed);
            debug!(worker_id, "worker thread exiting");
        })
        .expect("failed to spawn worker thread")
}

/// Spawn the timer thread that releases delayed jobs and fires watchdogs.
fn spawn_timer(
    timer: Arc<Mutex<TimerState>>,
    timer_wake: Arc<Condvar>,
    task_tx: Sender<Message>,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name("tg-timer".into())
        .spawn(move || {
            debug!("timer thread started");
            let mut state = timer.lock();
            loop {
                if state.shutdown {
                    break;
                }
                let now = Instant::now();
                if state.heap.peek().is_some_and(|entry| entry.due <= now) {
                    if let Some(entry) = state.heap.pop() {
                        match entry.action {
                            TimerAction::Dispatch { job, abandon } => {
                                if task_tx.send(Message::Run(job)).is_err() {
                                    warn!("worker channel closed, cancelling scheduled job");
                                    MutexGuard::unlocked(&mut state, abandon);
                                }
                            }
                            TimerAction::Inline(callback) => {
                                // Settlement callbacks take handle and gate
                                // locks; run them outside the timer lock.
                                MutexGuard::unlocked(&mut state, || {
                                    if catch_unwind(AssertUnwindSafe(callback)).is_err() {
                                        error!("timer callback panicked");
                                    }
                                });
                            }
                        }
                    }
                    continue;
                }
                match state.heap.peek().map(|entry| entry.due) {
                    Some(due) => {
                        timer_wake.wait_until(&mut state, due);
                    }
                    None => timer_wake.wait(&mut state),
                }
            }

            // Shutdown: undispatched delayed jobs settle as cancelled so
            // their waiters unblock. Watchdog callbacks are dropped; their
            // tasks settle through the normal dispatch path.
            let remaining = std::mem::take(&mut state.heap);
            drop(state);
            for entry in remaining {
                if let TimerAction::Dispatch { abandon, .. } = entry.action {
                    if catch_unwind(AssertUnwindSafe(abandon)).is_err() {
                        error!("cancel hook panicked during timer shutdown");
                    }
                }
            }
            debug!("timer thread exiting");
        })
        .expect("failed to spawn timer thread")
}
