//! # Taskgate
//!
//! A shared worker thread pool with bounded per-queue admission control.
//!
//! This library provides a single concurrency primitive used across a process:
//! one [`core::WorkerPool`] of dedicated OS worker threads, and any number of
//! [`core::TaskQueue`]s layered on top of it. Each queue independently bounds
//! how many of *its own* submissions may be outstanding at once, while all
//! queues share the same workers. The queue's `enqueue` blocks the producer
//! when its capacity is exhausted (backpressure), every submission races an
//! optional deadline, and failed or timed-out tasks notify a per-queue
//! failure handler before their handles resolve.
//!
//! ## Core Problem Solved
//!
//! Many call sites need to fan work out against a common set of threads while
//! keeping their own streams independently throttled:
//!
//! - **One pool, many queues**: thread-creation cost is amortized; admission
//!   limits stay per-stream
//! - **Backpressure, not rejection**: a full queue suspends its producer
//!   instead of dropping work
//! - **Deadlines and cancellation**: each task races a per-queue timeout; a
//!   queue can cancel everything it still tracks, best-effort
//! - **Ordered drains**: results come back in submission order regardless of
//!   completion timing
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use taskgate::config::PoolConfig;
//! use taskgate::core::{invoker_fn, WorkerPool};
//!
//! let pool = WorkerPool::new(PoolConfig::new().with_worker_count(4))?;
//!
//! let queue = pool
//!     .new_queue(invoker_fn(|n: i32| Ok(n * 10)), 2)
//!     .with_timeout(Duration::from_secs(30))
//!     .with_failure_handler(|err| eprintln!("task failed: {err}"))
//!     .build();
//!
//! queue.enqueue(1)?;
//! queue.enqueue(2)?;
//! queue.enqueue(3)?; // blocks until one of the first two settles
//!
//! let results = queue.wait_for_results(false)?;
//! assert_eq!(results, vec![10, 20, 30]);
//!
//! pool.shutdown();
//! ```
//!
//! For complete examples, see `tests/task_queue_test.rs` and
//! `tests/worker_pool_test.rs`.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]

/// Core scheduling primitives: pool, queue, handles, errors.
pub mod core;
/// Configuration models for pools.
pub mod config;
/// Builders to construct queues from a pool plus configuration.
pub mod builders;
/// Shared utilities.
pub mod util;
