//! Boss/worker thread pools.
//!
//! A [`WorkerPool`] owns its [`BoundedQueue`], the worker threads draining it and
//! a completion counter. Nothing here is global: the download client and the
//! server each build their own pool.
//!
//! # Lifecycle
//!
//! 1. The boss creates the pool with a fixed number of workers.
//! 2. The boss submits items; workers dequeue them in FIFO order and run the
//!    job, each item going to exactly one worker.
//! 3. A boss with a known amount of work waits on the completion counter,
//!    then shuts the pool down, which closes the queue and joins the workers
//!    after the backlog drains.
mod queue;
mod worker;

pub use queue::{BoundedQueue, QueueError};
pub use worker::{PoolError, WorkerPool};
