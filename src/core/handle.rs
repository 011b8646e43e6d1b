//! Settle-once task handles.
//!
//! A [`TaskHandle`] is the opaque representation of "a result that will
//! become available, fail, time out, or be cancelled". Exactly one of those
//! four outcomes occurs per handle; the first settlement wins and later
//! attempts are no-ops.
//!
//! Waiting uses a `parking_lot` Mutex + Condvar pair per handle - no polling.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::core::error::TaskError;

/// Lifecycle of a handle's stored outcome.
enum HandleState<R> {
    /// No terminal outcome yet.
    Pending,
    /// Terminal outcome recorded; a success value is still in place.
    Settled(Result<R, TaskError>),
    /// A success value was consumed by a waiter. Failures are never moved to
    /// this state so they stay observable by any number of waiters.
    Taken,
}

struct HandleInner<R> {
    state: Mutex<HandleState<R>>,
    settled: Condvar,
}

/// A shareable handle to the eventual outcome of one submitted task.
///
/// Cloning is cheap (an `Arc` bump); all clones observe the same settlement.
/// The success value is taken by the first successful [`TaskHandle::wait`];
/// failures remain observable by every clone.
pub struct TaskHandle<R> {
    inner: Arc<HandleInner<R>>,
}

impl<R> Clone for TaskHandle<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R> Default for TaskHandle<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> TaskHandle<R> {
    /// Create a pending handle.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HandleInner {
                state: Mutex::new(HandleState::Pending),
                settled: Condvar::new(),
            }),
        }
    }

    /// Record a terminal outcome if the handle is still pending.
    ///
    /// Returns `true` when this call performed the settlement. Losers of the
    /// race (a timeout watchdog firing after completion, a second `cancel`)
    /// get `false` and must not run their side effects.
    pub(crate) fn settle(&self, outcome: Result<R, TaskError>) -> bool {
        self.settle_with(outcome, |_| {})
    }

    /// Like [`Self::settle`], running `before_notify` inside the settlement
    /// critical section.
    ///
    /// The hook runs after the settlement race is decided but before waiters
    /// can observe the outcome, so side effects such as admission-slot
    /// release and failure-handler notification are complete by the time any
    /// `wait` call returns. The hook must not wait on this handle.
    pub(crate) fn settle_with(
        &self,
        outcome: Result<R, TaskError>,
        before_notify: impl FnOnce(&Result<R, TaskError>),
    ) -> bool {
        let mut state = self.inner.state.lock();
        if !matches!(*state, HandleState::Pending) {
            return false;
        }
        before_notify(&outcome);
        *state = HandleState::Settled(outcome);
        self.inner.settled.notify_all();
        true
    }

    /// Settle the handle as [`TaskError::Cancelled`] if still pending.
    ///
    /// Best-effort: a task already running to completion is not interrupted,
    /// but a cancelled handle observed before execution starts prevents the
    /// work from running at all. Returns `true` if this call cancelled the
    /// handle.
    pub fn cancel(&self) -> bool {
        self.settle(Err(TaskError::Cancelled))
    }

    /// Whether a terminal outcome has been recorded.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        !matches!(*self.inner.state.lock(), HandleState::Pending)
    }

    /// Block until the handle settles and return its outcome.
    ///
    /// The first waiter to observe a success takes the value; concurrent or
    /// repeated waits on an already-consumed success fail. Failures are
    /// returned (cloned) to every waiter.
    pub fn wait(&self) -> Result<R, TaskError> {
        let mut state = self.inner.state.lock();
        loop {
            match &*state {
                HandleState::Pending => self.inner.settled.wait(&mut state),
                HandleState::Settled(Err(err)) => return Err(err.clone()),
                HandleState::Settled(Ok(_)) => {
                    if let HandleState::Settled(Ok(value)) =
                        std::mem::replace(&mut *state, HandleState::Taken)
                    {
                        return Ok(value);
                    }
                }
                HandleState::Taken => {
                    return Err(TaskError::Failed("result already taken".into()))
                }
            }
        }
    }

    /// Block until the handle settles or `deadline` passes.
    ///
    /// Returns `None` when the deadline elapses with the handle still
    /// pending; the handle itself is *not* settled by a caller-side wait
    /// timeout.
    pub fn wait_until(&self, deadline: Instant) -> Option<Result<R, TaskError>> {
        let mut state = self.inner.state.lock();
        loop {
            match &*state {
                HandleState::Pending => {
                    if self
                        .inner
                        .settled
                        .wait_until(&mut state, deadline)
                        .timed_out()
                        && matches!(*state, HandleState::Pending)
                    {
                        return None;
                    }
                }
                HandleState::Settled(Err(err)) => return Some(Err(err.clone())),
                HandleState::Settled(Ok(_)) => {
                    if let HandleState::Settled(Ok(value)) =
                        std::mem::replace(&mut *state, HandleState::Taken)
                    {
                        return Some(Ok(value));
                    }
                }
                HandleState::Taken => {
                    return Some(Err(TaskError::Failed("result already taken".into())))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_first_settlement_wins() {
        let handle: TaskHandle<u32> = TaskHandle::new();
        assert!(handle.settle(Ok(7)));
        assert!(!handle.settle(Err(TaskError::TimedOut)));
        assert_eq!(handle.wait().unwrap(), 7);
    }

    #[test]
    fn test_cancel_only_when_pending() {
        let handle: TaskHandle<u32> = TaskHandle::new();
        assert!(handle.cancel());
        assert!(!handle.cancel());
        assert_eq!(handle.wait(), Err(TaskError::Cancelled));
        // Failures stay observable by every clone.
        assert_eq!(handle.clone().wait(), Err(TaskError::Cancelled));
    }

    #[test]
    fn test_wait_blocks_until_settled() {
        let handle: TaskHandle<&'static str> = TaskHandle::new();
        let waiter = handle.clone();
        let joiner = thread::spawn(move || waiter.wait());

        thread::sleep(Duration::from_millis(50));
        assert!(handle.settle(Ok("done")));
        assert_eq!(joiner.join().unwrap().unwrap(), "done");
    }

    #[test]
    fn test_wait_until_deadline_leaves_handle_pending() {
        let handle: TaskHandle<u32> = TaskHandle::new();
        let deadline = Instant::now() + Duration::from_millis(30);
        assert!(handle.wait_until(deadline).is_none());
        assert!(!handle.is_settled());
        assert!(handle.settle(Ok(1)));
    }

    #[test]
    fn test_success_value_taken_once() {
        let handle: TaskHandle<u32> = TaskHandle::new();
        handle.settle(Ok(5));
        assert_eq!(handle.wait().unwrap(), 5);
        assert!(matches!(handle.wait(), Err(TaskError::Failed(_))));
    }

    #[test]
    fn test_side_effects_visible_before_waiters_wake() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let flag = Arc::new(AtomicBool::new(false));
        let handle: TaskHandle<u32> = TaskHandle::new();

        let waiter = handle.clone();
        let observed = Arc::clone(&flag);
        let joiner = thread::spawn(move || {
            let _ = waiter.wait();
            observed.load(Ordering::SeqCst)
        });

        thread::sleep(Duration::from_millis(20));
        let hook_flag = Arc::clone(&flag);
        handle.settle_with(Ok(1), |_| hook_flag.store(true, Ordering::SeqCst));
        assert!(joiner.join().unwrap());
    }
}
