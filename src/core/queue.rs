//! Pending admission / eviction queues.
//!
//! Producers (login handlers, disconnect handlers, content code) push from
//! any thread; the clock thread is the only consumer and drains at most a
//! fixed number of entries per tick.

use std::sync::Arc;

use crossbeam_queue::SegQueue;

/// Lock-free multi-producer FIFO shared between producers and the tick.
///
/// Cloning yields another handle to the same queue.
pub struct PendingQueue<T> {
    inner: Arc<SegQueue<T>>,
}

impl<T> PendingQueue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SegQueue::new()),
        }
    }

    /// Enqueue an entry. Safe from any thread.
    #[inline]
    pub fn push(&self, item: T) {
        self.inner.push(item);
    }

    /// Dequeue the oldest entry.
    #[inline]
    pub fn pop(&self) -> Option<T> {
        self.inner.pop()
    }

    /// Number of queued entries (racy with concurrent producers).
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Pop up to `limit` entries, oldest first.
    pub fn drain_bounded(&self, limit: usize) -> Vec<T> {
        let mut out = Vec::with_capacity(limit.min(self.len()));
        while out.len() < limit {
            match self.inner.pop() {
                Some(item) => out.push(item),
                None => break,
            }
        }
        out
    }

    /// Examine up to `limit` entries; keep those for which `take` returns
    /// `true` and push the rest back to await a later tick.
    ///
    /// Rejected entries rotate to the tail, behind the entries this call did
    /// not examine, so a run of blocked entries at the head never hides the
    /// rest of the queue from the drain. Returns the taken entries in queue
    /// order.
    pub fn drain_where<F>(&self, limit: usize, mut take: F) -> Vec<T>
    where
        F: FnMut(&T) -> bool,
    {
        let mut taken = Vec::new();
        let mut deferred = Vec::new();
        for item in self.drain_bounded(limit) {
            if take(&item) {
                taken.push(item);
            } else {
                deferred.push(item);
            }
        }
        for item in deferred {
            self.inner.push(item);
        }
        taken
    }
}

impl<T> Clone for PendingQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for PendingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_drain_bounded_leaves_excess_queued() {
        let queue = PendingQueue::new();
        for i in 0..120 {
            queue.push(i);
        }

        let first = queue.drain_bounded(50);
        assert_eq!(first, (0..50).collect::<Vec<_>>());
        assert_eq!(queue.len(), 70);

        let second = queue.drain_bounded(50);
        assert_eq!(second.first(), Some(&50));
        assert_eq!(queue.len(), 20);
    }

    #[test]
    fn test_drain_where_defers_rejected() {
        let queue = PendingQueue::new();
        for i in 0..6 {
            queue.push(i);
        }

        let even = queue.drain_where(4, |n| n % 2 == 0);
        assert_eq!(even, vec![0, 2]);
        // 4 and 5 were never examined; 1 and 3 were pushed back behind them
        assert_eq!(queue.drain_bounded(10), vec![4, 5, 1, 3]);
    }

    #[test]
    fn test_drain_where_reaches_entries_behind_blocked_head() {
        let queue = PendingQueue::new();
        for i in 0..6 {
            queue.push(i);
        }

        // 0..3 never become ready; 3..6 are ready but sit behind them
        let mut taken = Vec::new();
        for _ in 0..2 {
            taken.extend(queue.drain_where(3, |n| *n >= 3));
        }
        assert_eq!(taken, vec![3, 4, 5]);
        assert_eq!(queue.drain_bounded(10), vec![0, 1, 2]);
    }

    #[test]
    fn test_concurrent_producers() {
        let queue = PendingQueue::new();
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let q = queue.clone();
                thread::spawn(move || {
                    for i in 0..250 {
                        q.push(t * 1000 + i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(queue.len(), 1000);
    }
}
