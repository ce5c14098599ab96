//! Priority queue with grouped tier dequeue.
//!
//! The ordering queues attached to a step are not one-item-at-a-time queues:
//! everything enqueued at the same priority is meant to run concurrently, so
//! a dequeue removes and returns the *entire* highest-priority tier as one
//! batch. A drained tier is never revisited; items enqueued at that priority
//! afterwards form a new, later tier visit.

use super::error::{Error, Result};

/// An ordered multi-map from integer priority to enqueued items.
///
/// Higher priority values dequeue first. Ordering among items that share a
/// priority is unspecified: a tier is an unordered batch, reflecting that its
/// members are dispatched together.
///
/// Enqueue is append-then-resort (O(n log n)); a tier dequeue is proportional
/// to the batch size.
///
/// # Example
///
/// ```
/// use taxis::core::PriorityQueue;
///
/// let mut queue = PriorityQueue::new();
/// queue.enqueue("low", 0);
/// queue.enqueue_all(["a", "b"], 5);
///
/// let (tier, batch) = queue.dequeue().unwrap();
/// assert_eq!(tier, 5);
/// assert_eq!(batch.len(), 2);
///
/// let (tier, batch) = queue.dequeue().unwrap();
/// assert_eq!((tier, batch.as_slice()), (0, &["low"][..]));
/// assert!(queue.dequeue().is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct PriorityQueue<T> {
    /// Entries kept sorted by descending priority. The sort is stable, so
    /// same-tier items retain insertion order internally, but callers must
    /// not rely on that.
    entries: Vec<(i64, T)>,
}

impl<T> PriorityQueue<T> {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Returns the number of items across all tiers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no items remain.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Enqueues a single item at the given priority.
    pub fn enqueue(&mut self, item: T, priority: i64) {
        self.entries.push((priority, item));
        self.resort();
    }

    /// Enqueues several items at the same priority.
    pub fn enqueue_all<I: IntoIterator<Item = T>>(&mut self, items: I, priority: i64) {
        self.entries
            .extend(items.into_iter().map(|item| (priority, item)));
        self.resort();
    }

    /// Removes and returns the entire highest-priority tier.
    ///
    /// The returned pair is the tier's priority value and every item that was
    /// enqueued at it. Fails with [`Error::EmptyQueue`] when nothing remains.
    pub fn dequeue(&mut self) -> Result<(i64, Vec<T>)> {
        let tier = match self.entries.first() {
            Some((priority, _)) => *priority,
            None => return Err(Error::EmptyQueue),
        };

        let end = self
            .entries
            .iter()
            .position(|(priority, _)| *priority != tier)
            .unwrap_or(self.entries.len());

        let batch = self
            .entries
            .drain(..end)
            .map(|(_, item)| item)
            .collect();

        Ok((tier, batch))
    }

    /// Returns the next item to be dequeued without removing it, or `None`
    /// on an empty queue.
    pub fn peek(&self) -> Option<&T> {
        self.entries.first().map(|(_, item)| item)
    }

    fn resort(&mut self) {
        // Stable sort: descending by priority.
        self.entries.sort_by(|(a, _), (b, _)| b.cmp(a));
    }
}
