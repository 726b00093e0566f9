use std::{
    collections::VecDeque,
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
};

use thiserror::Error;

/// Why an item was handed back instead of being queued.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError<T> {
    #[error("queue is closed")]
    Closed(T),
    #[error("queue is full")]
    Full(T),
}

impl<T> QueueError<T> {
    pub fn into_inner(self) -> T {
        match self {
            QueueError::Closed(item) | QueueError::Full(item) => item,
        }
    }
}

#[derive(Debug)]
struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Blocking FIFO shared between producers and consumers.
///
/// With a capacity, [`enqueue`](Self::enqueue) waits for room. Once
/// [`close`](Self::close) is called no new items are accepted, but everything
/// already queued is still handed out before [`dequeue`](Self::dequeue)
/// returns `None`.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: Option<usize>,
}

impl<T> BoundedQueue<T> {
    pub fn unbounded() -> Self {
        Self::new(None)
    }

    pub fn new(capacity: Option<usize>) -> Self {
        assert!(capacity != Some(0));

        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    // Nothing panics while the lock is held, so a poisoned state is still consistent.
    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_full(&self, state: &QueueState<T>) -> bool {
        self.capacity.is_some_and(|cap| state.items.len() >= cap)
    }

    /// Queues `item`, waiting while the queue is at capacity.
    pub fn enqueue(&self, item: T) -> Result<(), QueueError<T>> {
        let mut state = self.lock();
        while !state.closed && self.is_full(&state) {
            state = self
                .not_full
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if state.closed {
            return Err(QueueError::Closed(item));
        }

        state.items.push_back(item);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Queues `item` only if there is room right now.
    pub fn try_enqueue(&self, item: T) -> Result<(), QueueError<T>> {
        let mut state = self.lock();
        if state.closed {
            return Err(QueueError::Closed(item));
        }
        if self.is_full(&state) {
            return Err(QueueError::Full(item));
        }

        state.items.push_back(item);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Takes the oldest item, waiting while the queue is empty and open.
    /// Returns `None` once the queue is closed and drained.
    pub fn dequeue(&self) -> Option<T> {
        let mut state = self.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Some(item);
            }
            if state.closed {
                return None;
            }
            state = self
                .not_empty
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Stops accepting items and wakes every waiter. Idempotent.
    pub fn close(&self) {
        self.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
