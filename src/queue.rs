//! A bounded, blocking FIFO shared between request producers and a device worker.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

/// Default number of requests a device queue holds before `push` blocks.
pub const DEFAULT_QUEUE_CAPACITY: usize = 128;

/// A multi-producer multi-consumer FIFO.
///
/// `push` blocks while the queue is full, which is the only backpressure between callers and
/// devices. A capacity of 0 makes the queue unbounded.
#[derive(Debug)]
pub struct RequestQueue<T> {
    items: Mutex<VecDeque<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl<T> Default for RequestQueue<T> {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl<T> RequestQueue<T> {
    /// An empty queue holding at most `capacity` items, unbounded when 0.
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    /// Maximum number of queued items, or 0 when unbounded.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Append an item, waiting while the queue is full.
    pub fn push(&self, item: T) {
        let mut items = self.items.lock();
        while self.capacity > 0 && items.len() >= self.capacity {
            self.not_full.wait(&mut items);
        }
        items.push_back(item);
        drop(items);
        self.not_empty.notify_all();
    }

    /// Remove the head, waiting while the queue is empty.
    pub fn pop(&self) -> T {
        let mut items = self.items.lock();
        loop {
            if let Some(item) = items.pop_front() {
                drop(items);
                self.not_full.notify_one();
                return item;
            }
            self.not_empty.wait(&mut items);
        }
    }

    /// Remove the head if there is one.
    pub fn try_pop(&self) -> Option<T> {
        let item = self.items.lock().pop_front();
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }
}
