//! Fixed-capacity history with oldest-first eviction

use parking_lot::Mutex;
use std::collections::VecDeque;

/// Append-only history holding at most `capacity` items.
///
/// Append and evict happen under one lock, so concurrent writers never lose
/// updates or overshoot the capacity.
#[derive(Debug)]
pub struct BoundedHistory<T> {
    capacity: usize,
    items: Mutex<VecDeque<T>>,
}

impl<T: Clone> BoundedHistory<T> {
    /// Create a history; a zero capacity is raised to one
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            items: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
        }
    }

    /// Append an item, returning the evicted oldest item if the history was full
    pub fn push(&self, item: T) -> Option<T> {
        let mut items = self.items.lock();
        let evicted = if items.len() >= self.capacity {
            items.pop_front()
        } else {
            None
        };
        items.push_back(item);
        evicted
    }

    /// All items, oldest first
    pub fn snapshot(&self) -> Vec<T> {
        self.items.lock().iter().cloned().collect()
    }

    /// Items matching `predicate`, oldest first
    pub fn filtered<F>(&self, predicate: F) -> Vec<T>
    where
        F: Fn(&T) -> bool,
    {
        self.items
            .lock()
            .iter()
            .filter(|item| predicate(item))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}
