use std::{
    io,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Condvar, Mutex, PoisonError},
    thread,
};

use log::{debug, error, info};
use thiserror::Error;

use super::queue::{BoundedQueue, QueueError};

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to spawn worker {id}: {source}")]
    Spawn { id: usize, source: io::Error },
    #[error("worker {0} panicked")]
    Join(usize),
}

/// Counts finished jobs and lets the boss wait for a target.
#[derive(Debug, Default)]
struct Completion {
    done: Mutex<usize>,
    cond: Condvar,
}

impl Completion {
    fn increment(&self) {
        *self.done.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        self.cond.notify_all();
    }

    fn get(&self) -> usize {
        *self.done.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_for(&self, total: usize) {
        let done = self.done.lock().unwrap_or_else(PoisonError::into_inner);
        let _done = self
            .cond
            .wait_while(done, |done| *done < total)
            .unwrap_or_else(PoisonError::into_inner);
    }
}

/// Fixed set of threads draining a [`BoundedQueue`].
///
/// Each worker runs `job` on every item it dequeues and bumps the completion
/// counter afterwards, whether or not the job panicked. Workers exit once the
/// queue is closed and empty.
#[derive(Debug)]
pub struct WorkerPool<T: Send + 'static> {
    queue: Arc<BoundedQueue<T>>,
    completion: Arc<Completion>,
    workers: Vec<Worker>,
}

impl<T: Send + 'static> WorkerPool<T> {
    pub fn new<F>(size: usize, capacity: Option<usize>, job: F) -> Result<Self, PoolError>
    where
        F: Fn(usize, T) + Send + Sync + 'static,
    {
        assert!(size > 0);

        let queue = Arc::new(BoundedQueue::new(capacity));
        let completion = Arc::new(Completion::default());
        let job = Arc::new(job);

        let mut pool = Self {
            queue,
            completion,
            workers: Vec::with_capacity(size),
        };

        for id in 0..size {
            // On failure `pool` is dropped here, which closes the queue and joins
            // the workers already started.
            let worker = Worker::spawn(
                id,
                Arc::clone(&pool.queue),
                Arc::clone(&pool.completion),
                Arc::clone(&job),
            )?;
            pool.workers.push(worker);
        }

        info!("started {size} workers");
        Ok(pool)
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub fn queue(&self) -> &BoundedQueue<T> {
        &self.queue
    }

    /// Queues an item, waiting for room if the queue is bounded.
    pub fn submit(&self, item: T) -> Result<(), QueueError<T>> {
        self.queue.enqueue(item)
    }

    /// Queues an item only if there is room right now.
    pub fn try_submit(&self, item: T) -> Result<(), QueueError<T>> {
        self.queue.try_enqueue(item)
    }

    /// Number of items workers have finished with.
    pub fn completed(&self) -> usize {
        self.completion.get()
    }

    /// Blocks until at least `total` items have been completed.
    pub fn wait_for(&self, total: usize) {
        self.completion.wait_for(total);
    }

    /// Closes the queue and joins every worker once the backlog is drained.
    pub fn shutdown(mut self) -> Result<(), PoolError> {
        self.join_all()
    }

    fn join_all(&mut self) -> Result<(), PoolError> {
        self.queue.close();

        let mut result = Ok(());
        for worker in self.workers.drain(..) {
            debug!("shutting down worker {}", worker.id);

            if worker.thread.join().is_err() {
                result = Err(PoolError::Join(worker.id));
            }
        }
        result
    }
}

impl<T: Send + 'static> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        if let Err(e) = self.join_all() {
            error!("{e}");
        }
    }
}

#[derive(Debug)]
struct Worker {
    id: usize,
    thread: thread::JoinHandle<()>,
}

impl Worker {
    fn spawn<T, F>(
        id: usize,
        queue: Arc<BoundedQueue<T>>,
        completion: Arc<Completion>,
        job: Arc<F>,
    ) -> Result<Self, PoolError>
    where
        T: Send + 'static,
        F: Fn(usize, T) + Send + Sync + 'static,
    {
        let thread = thread::Builder::new()
            .name(format!("worker-{id}"))
            .spawn(move || {
                while let Some(item) = queue.dequeue() {
                    debug!("worker {id} handling an item");
                    if panic::catch_unwind(AssertUnwindSafe(|| (*job)(id, item))).is_err() {
                        error!("worker {id} recovered from a panicking job");
                    }
                    completion.increment();
                }
                debug!("worker {id} disconnected");
            })
            .map_err(|source| PoolError::Spawn { id, source })?;

        Ok(Self { id, thread })
    }
}
