//! Bounded FIFO ring of pending mutations.

use crate::node::Mutation;

/// Fixed-capacity circular buffer.
///
/// Pure data structure: capacity checks and the blocking protocol (producers
/// waiting for space, the flush worker waiting for the threshold) are driven
/// by the owning node under its mutex.
#[derive(Debug)]
pub(crate) struct RingQueue {
    slots: Vec<Option<Mutation>>,
    /// Next slot to pop.
    head: usize,
    /// Next slot to fill.
    tail: usize,
    len: usize,
}

impl RingQueue {
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub(crate) fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be positive");
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            head: 0,
            tail: 0,
            len: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn is_full(&self) -> bool {
        self.len == self.slots.len()
    }

    /// Appends a mutation.
    ///
    /// # Panics
    ///
    /// Panics if the queue is full; the caller checks under its lock.
    pub(crate) fn push(&mut self, mutation: Mutation) {
        assert!(!self.is_full(), "push on a full queue");
        self.slots[self.tail] = Some(mutation);
        self.tail = (self.tail + 1) % self.slots.len();
        self.len += 1;
    }

    /// Removes the oldest mutation, or `None` when empty.
    pub(crate) fn pop(&mut self) -> Option<Mutation> {
        if self.is_empty() {
            return None;
        }
        let mutation = self.slots[self.head].take();
        self.head = (self.head + 1) % self.slots.len();
        self.len -= 1;
        mutation
    }
}
