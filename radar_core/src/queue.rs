//! Bounded FIFO queues between pipeline stages.
//!
//! Classic producer–consumer on a mutex + condition-variable pair: an empty
//! queue blocks the consumer, a full queue blocks the producer
//! (backpressure). A producer that waits past its backpressure timeout
//! drops the oldest element instead of losing the new one, and the drop is
//! reported so the caller can count it. No busy-waiting anywhere.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// How a push resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    Pushed,
    /// The queue stayed full past the timeout; the oldest element was
    /// dropped to make room
    DroppedOldest,
}

/// How a pop resolved.
#[derive(Debug)]
pub enum PopOutcome<T> {
    Item(T),
    TimedOut,
    /// Closed and fully drained
    Closed,
}

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// A bounded multi-producer multi-consumer FIFO.
pub struct BoundedQueue<T> {
    name: &'static str,
    capacity: usize,
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> BoundedQueue<T> {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            capacity: capacity.max(1),
            inner: Mutex::new(Inner { items: VecDeque::new(), closed: false }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Enqueue with backpressure. Blocks up to `timeout` while full; if
    /// still full afterwards the oldest element is dropped. Returns `None`
    /// when the queue is closed.
    pub fn push(&self, item: T, timeout: Duration) -> Option<PushOutcome> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if inner.closed {
                return None;
            }
            if inner.items.len() < self.capacity {
                inner.items.push_back(item);
                self.not_empty.notify_one();
                return Some(PushOutcome::Pushed);
            }
            let now = Instant::now();
            if now >= deadline {
                inner.items.pop_front();
                inner.items.push_back(item);
                self.not_empty.notify_one();
                return Some(PushOutcome::DroppedOldest);
            }
            self.not_full.wait_for(&mut inner, deadline - now);
        }
    }

    /// Non-blocking enqueue: refuse instead of dropping the oldest. Used
    /// for the cue channel, which must never stall MANAGE.
    pub fn try_push(&self, item: T) -> bool {
        let mut inner = self.inner.lock();
        if inner.closed || inner.items.len() >= self.capacity {
            return false;
        }
        inner.items.push_back(item);
        self.not_empty.notify_one();
        true
    }

    /// Dequeue, blocking up to `timeout` on empty.
    pub fn pop(&self, timeout: Duration) -> PopOutcome<T> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if let Some(item) = inner.items.pop_front() {
                self.not_full.notify_one();
                return PopOutcome::Item(item);
            }
            if inner.closed {
                return PopOutcome::Closed;
            }
            let now = Instant::now();
            if now >= deadline {
                return PopOutcome::TimedOut;
            }
            self.not_empty.wait_for(&mut inner, deadline - now);
        }
    }

    /// Non-blocking dequeue.
    pub fn try_pop(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        let item = inner.items.pop_front();
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Close the queue: producers are refused, consumers drain what is left
    /// and then observe [`PopOutcome::Closed`].
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
