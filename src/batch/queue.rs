//! Internal Queue
//!
//! FIFO buffer of items that have been drained from the ingestion channel but
//! not yet flushed. The drain loop appends one item at a time; the flush
//! controller removes the oldest items in chunks.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;

/// Mutex-guarded FIFO queue shared between the drain loop and the flush controller
///
/// The lock is only held for the duration of a single push or chunk removal,
/// never across an `.await`.
pub struct InternalQueue<T> {
    items: Mutex<VecDeque<T>>,
}

impl<T> InternalQueue<T> {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
        }
    }

    /// Append an item and return the new length
    pub fn push(&self, item: T) -> usize {
        let mut items = self.items.lock();
        items.push_back(item);
        items.len()
    }

    /// Number of buffered items
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Whether the queue holds no items
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Remove and return up to `max` of the oldest items, in order
    pub fn take_chunk(&self, max: usize) -> Vec<T> {
        let mut items = self.items.lock();
        let count = max.min(items.len());
        items.drain(..count).collect()
    }
}

impl<T> Default for InternalQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for InternalQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InternalQueue")
            .field("len", &self.len())
            .finish()
    }
}
