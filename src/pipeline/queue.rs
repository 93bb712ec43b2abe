//! Multi-producer, single-consumer append queue.

use crossbeam::queue::{ArrayQueue, SegQueue};

enum Inner<T> {
    Unbounded(SegQueue<T>),
    Bounded(ArrayQueue<T>),
}

/// Lock-free queue between producer threads and the appender.
///
/// Each producer's offers are drained in the order that producer made them.
/// Any number of threads may offer; only the appender drains.
pub struct MpscAppendQueue<T> {
    inner: Inner<T>,
}

impl<T> MpscAppendQueue<T> {
    /// Create a queue without a capacity limit
    pub fn unbounded() -> Self {
        Self {
            inner: Inner::Unbounded(SegQueue::new()),
        }
    }

    /// Create a queue holding at most `capacity` items (minimum 1).
    pub fn bounded(capacity: usize) -> Self {
        Self {
            inner: Inner::Bounded(ArrayQueue::new(capacity.max(1))),
        }
    }

    /// Enqueue `item` without blocking.
    ///
    /// A full bounded queue hands the item back.
    pub fn offer(&self, item: T) -> Result<(), T> {
        match &self.inner {
            Inner::Unbounded(queue) => {
                queue.push(item);
                Ok(())
            }
            Inner::Bounded(queue) => queue.push(item),
        }
    }

    /// Pop the oldest item
    pub fn poll(&self) -> Option<T> {
        match &self.inner {
            Inner::Unbounded(queue) => queue.pop(),
            Inner::Bounded(queue) => queue.pop(),
        }
    }

    /// Move up to `max` items into `out` in FIFO order.
    ///
    /// Returns the number of items moved.
    pub fn drain(&self, out: &mut Vec<T>, max: usize) -> usize {
        let mut drained = 0;
        while drained < max {
            let Some(item) = self.poll() else {
                break;
            };
            out.push(item);
            drained += 1;
        }
        drained
    }

    /// Number of queued items
    pub fn len(&self) -> usize {
        match &self.inner {
            Inner::Unbounded(queue) => queue.len(),
            Inner::Bounded(queue) => queue.len(),
        }
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Capacity limit, if bounded
    pub fn capacity(&self) -> Option<usize> {
        match &self.inner {
            Inner::Unbounded(_) => None,
            Inner::Bounded(queue) => Some(queue.capacity()),
        }
    }
}

impl<T> Default for MpscAppendQueue<T> {
    fn default() -> Self {
        Self::unbounded()
    }
}
