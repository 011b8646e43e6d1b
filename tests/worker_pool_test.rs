//! Integration tests for WorkerPool.
//!
//! These tests validate pool-level functionality:
//! - Immediate and delayed invocation, with cancellation
//! - Bulk invocation: all-of semantics (ordered, fail-fast, deadline) and
//!   any-of semantics (first success wins, losers cancelled)
//! - Runtime resizing and graceful shutdown
//! - Concurrent submission from many producer threads

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use taskgate::config::PoolConfig;
use taskgate::core::{PoolError, TaskError, WorkerPool};

// ============================================================================
// HELPERS
// ============================================================================

fn pool(workers: usize) -> WorkerPool {
    taskgate::util::init_tracing();
    WorkerPool::new(PoolConfig::new().with_worker_count(workers)).unwrap()
}

fn wait_until(deadline: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    predicate()
}

// ============================================================================
// IMMEDIATE INVOCATION
// ============================================================================

#[test]
fn test_invoke_returns_result_through_handle() {
    let pool = pool(2);
    let handle = pool.invoke(|| "hello".to_string()).unwrap();
    assert_eq!(handle.wait().unwrap(), "hello");
    pool.shutdown();
}

#[test]
fn test_invoke_never_blocks_the_caller() {
    let pool = pool(1);
    let start = Instant::now();
    let handles: Vec<_> = (0..8)
        .map(|_| {
            pool.invoke(|| std::thread::sleep(Duration::from_millis(50)))
                .unwrap()
        })
        .collect();
    // Eight 50ms jobs on one worker: submission itself must be immediate.
    assert!(start.elapsed() < Duration::from_millis(40));
    for handle in handles {
        handle.wait().unwrap();
    }
    pool.shutdown();
}

// ============================================================================
// DELAYED INVOCATION
// ============================================================================

#[test]
fn test_invoke_after_respects_delay() {
    let pool = pool(2);
    let start = Instant::now();
    let handle = pool
        .invoke_after(move || Instant::now(), Duration::from_millis(80))
        .unwrap();
    let ran_at = handle.wait().unwrap();
    assert!(ran_at.duration_since(start) >= Duration::from_millis(80));
    pool.shutdown();
}

#[test]
fn test_invoke_after_cancel_prevents_execution() {
    let pool = pool(2);
    let ran = Arc::new(AtomicBool::new(false));
    let task_ran = Arc::clone(&ran);
    let handle = pool
        .invoke_after(
            move || task_ran.store(true, Ordering::SeqCst),
            Duration::from_millis(50),
        )
        .unwrap();

    assert!(handle.cancel());
    assert_eq!(handle.wait(), Err(TaskError::Cancelled));

    std::thread::sleep(Duration::from_millis(120));
    assert!(!ran.load(Ordering::SeqCst), "cancelled job must not run");
    pool.shutdown();
}

#[test]
fn test_delayed_jobs_fire_in_deadline_order() {
    let pool = pool(1);
    let order = Arc::new(parking_lot_order::Order::default());

    // Scheduled out of order; must fire by deadline.
    for (tag, delay_ms) in [("c", 90_u64), ("a", 30), ("b", 60)] {
        let order = Arc::clone(&order);
        pool.invoke_after(move || order.push(tag), Duration::from_millis(delay_ms))
            .unwrap();
    }

    assert!(wait_until(Duration::from_secs(2), || order.len() == 3));
    assert_eq!(order.snapshot(), vec!["a", "b", "c"]);
    pool.shutdown();
}

mod parking_lot_order {
    use parking_lot::Mutex;

    #[derive(Default)]
    pub struct Order(Mutex<Vec<&'static str>>);

    impl Order {
        pub fn push(&self, tag: &'static str) {
            self.0.lock().push(tag);
        }
        pub fn len(&self) -> usize {
            self.0.lock().len()
        }
        pub fn snapshot(&self) -> Vec<&'static str> {
            self.0.lock().clone()
        }
    }
}

// ============================================================================
// BULK INVOCATION: ALL-OF
// ============================================================================

#[test]
fn test_invoke_all_returns_results_in_input_order() {
    let pool = pool(4);
    let tasks: Vec<_> = (1..=5)
        .map(|n: u64| {
            move || {
                // Larger inputs finish first.
                std::thread::sleep(Duration::from_millis(60 / n));
                Ok(n * 100)
            }
        })
        .collect();
    let results = pool.invoke_all(tasks, Duration::from_secs(5)).unwrap();
    assert_eq!(results, vec![100, 200, 300, 400, 500]);
    pool.shutdown();
}

#[test]
fn test_invoke_all_fails_fast_on_first_failure() {
    let pool = pool(4);
    let tasks: Vec<Box<dyn FnOnce() -> anyhow::Result<u32> + Send>> = vec![
        Box::new(|| Ok(1)),
        Box::new(|| Err(anyhow::anyhow!("task two broke"))),
        Box::new(|| {
            std::thread::sleep(Duration::from_millis(400));
            Ok(3)
        }),
    ];
    let start = Instant::now();
    match pool.invoke_all(tasks, Duration::from_secs(5)) {
        Err(PoolError::Task(TaskError::Failed(msg))) => assert!(msg.contains("task two broke")),
        other => panic!("expected fail-fast error, got {other:?}"),
    }
    // The 400ms task is not waited for.
    assert!(start.elapsed() < Duration::from_millis(300));
    pool.shutdown();
}

#[test]
fn test_invoke_all_times_out_as_bulk_timeout() {
    let pool = pool(2);
    let tasks: Vec<_> = (0..2)
        .map(|_| {
            || {
                std::thread::sleep(Duration::from_millis(500));
                Ok(())
            }
        })
        .collect();
    match pool.invoke_all(tasks, Duration::from_millis(80)) {
        Err(PoolError::BulkTimeout(timeout)) => {
            assert_eq!(timeout, Duration::from_millis(80));
        }
        other => panic!("expected bulk timeout, got {other:?}"),
    }
    pool.shutdown();
}

// ============================================================================
// BULK INVOCATION: ANY-OF
// ============================================================================

#[test]
fn test_invoke_any_returns_first_success() {
    let pool = pool(4);
    let tasks: Vec<Box<dyn FnOnce() -> anyhow::Result<&'static str> + Send>> = vec![
        Box::new(|| {
            std::thread::sleep(Duration::from_millis(200));
            Ok("slow")
        }),
        Box::new(|| {
            std::thread::sleep(Duration::from_millis(30));
            Ok("fast")
        }),
        Box::new(|| Err(anyhow::anyhow!("immediate failure"))),
    ];
    let winner = pool.invoke_any(tasks, Duration::from_secs(5)).unwrap();
    assert_eq!(winner, "fast");
    pool.shutdown();
}

#[test]
fn test_invoke_any_surfaces_failure_when_all_fail() {
    let pool = pool(2);
    let tasks: Vec<_> = (0..3)
        .map(|n: u32| move || -> anyhow::Result<u32> { Err(anyhow::anyhow!("task {n} failed")) })
        .collect();
    match pool.invoke_any(tasks, Duration::from_secs(5)) {
        Err(PoolError::Task(TaskError::Failed(msg))) => assert!(msg.contains("failed")),
        other => panic!("expected aggregate failure, got {other:?}"),
    }
    pool.shutdown();
}

#[test]
fn test_invoke_any_times_out_without_success() {
    let pool = pool(2);
    let tasks: Vec<_> = (0..2)
        .map(|_| {
            || {
                std::thread::sleep(Duration::from_millis(500));
                Ok(1_u32)
            }
        })
        .collect();
    match pool.invoke_any(tasks, Duration::from_millis(60)) {
        Err(PoolError::BulkTimeout(_)) => {}
        other => panic!("expected bulk timeout, got {other:?}"),
    }
    pool.shutdown();
}

// ============================================================================
// RESIZING
// ============================================================================

#[test]
fn test_set_core_size_grows_the_pool() {
    let pool = pool(1);
    assert_eq!(pool.stats().worker_count, 1);

    pool.set_core_size(3);
    assert!(wait_until(Duration::from_secs(2), || {
        pool.stats().worker_count == 3
    }));
    pool.shutdown();
}

#[test]
fn test_set_core_size_shrinks_the_pool() {
    let pool = pool(3);
    pool.set_core_size(1);
    // Retire messages are consumed in-band; idle workers pick them up.
    assert!(wait_until(Duration::from_secs(2), || {
        pool.stats().worker_count == 1
    }));

    // The survivor still executes work.
    let handle = pool.invoke(|| 9).unwrap();
    assert_eq!(handle.wait().unwrap(), 9);
    pool.shutdown();
}

#[test]
fn test_set_max_size_caps_core_size() {
    let pool = WorkerPool::new(
        PoolConfig::new()
            .with_worker_count(2)
            .with_max_workers(4),
    )
    .unwrap();

    // Requests beyond max are clamped.
    pool.set_core_size(10);
    assert!(wait_until(Duration::from_secs(2), || {
        pool.stats().worker_count == 4
    }));

    // Lowering max shrinks the pool.
    pool.set_max_size(2);
    assert!(wait_until(Duration::from_secs(2), || {
        pool.stats().worker_count == 2
    }));
    pool.shutdown();
}

// ============================================================================
// SHUTDOWN
// ============================================================================

#[test]
fn test_shutdown_is_idempotent_and_rejects_new_work() {
    let pool = pool(2);
    let handle = pool.invoke(|| 5).unwrap();
    assert_eq!(handle.wait().unwrap(), 5);

    pool.shutdown();
    pool.shutdown();
    assert!(matches!(pool.invoke(|| 1), Err(PoolError::Shutdown)));
}

#[test]
fn test_shutdown_cancels_undispatched_delayed_jobs() {
    let pool = pool(2);
    let handle = pool.invoke_after(|| 42, Duration::from_secs(30)).unwrap();

    pool.shutdown();

    // Settlement happens before shutdown() returns (the timer thread is
    // joined), so a bounded wait must observe the cancellation.
    let outcome = handle.wait_until(Instant::now() + Duration::from_millis(300));
    assert_eq!(outcome, Some(Err(TaskError::Cancelled)));
}

#[test]
fn test_shutdown_waits_for_in_flight_tasks() {
    let pool = pool(2);
    let done = Arc::new(AtomicBool::new(false));
    let task_done = Arc::clone(&done);
    pool.invoke(move || {
        std::thread::sleep(Duration::from_millis(100));
        task_done.store(true, Ordering::SeqCst);
    })
    .unwrap();

    pool.shutdown();
    assert!(done.load(Ordering::SeqCst));
}

// ============================================================================
// CONCURRENT SUBMISSION
// ============================================================================

#[test]
fn test_many_producers_share_one_pool() {
    let pool = pool(4);
    let completed = Arc::new(AtomicUsize::new(0));

    let producers: Vec<_> = (0..4)
        .map(|_| {
            let pool = pool.clone();
            let completed = Arc::clone(&completed);
            std::thread::spawn(move || {
                let handles: Vec<_> = (0..25)
                    .map(|n: usize| pool.invoke(move || n + 1).unwrap())
                    .collect();
                for handle in handles {
                    handle.wait().unwrap();
                    completed.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();

    for producer in producers {
        producer.join().unwrap();
    }
    assert_eq!(completed.load(Ordering::SeqCst), 100);

    let stats = pool.stats();
    assert_eq!(stats.submitted_tasks, 100);
    assert_eq!(stats.completed_tasks, 100);
    pool.shutdown();
}
