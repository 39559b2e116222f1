//! Bounded per-key wait sets for single-flight fetches.

use std::collections::HashMap;
use std::sync::Arc;

use swiftstore_core::Key;

use crate::sync::Condvar;

/// Waiters for one key's in-flight fetch.
#[derive(Debug)]
struct WaitEntry {
    cond: Arc<Condvar>,
    waiters: usize,
}

/// Bounded map from key to the condition variable shared by that key's
/// waiters.
///
/// An entry exists exactly while at least one task waits on the key's fetch.
/// Waiters drain one at a time: each woken waiter wakes the next before
/// re-reading the cache, so the whole line advances off a single completion
/// signal. The capacity bounds the number of distinct keys with concurrent
/// waiters; past it, novel keys are refused.
#[derive(Debug)]
pub(crate) struct CondSet {
    entries: HashMap<Key, WaitEntry>,
    capacity: usize,
}

impl CondSet {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// Joins the wait set for `key`, returning the condition variable to wait
    /// on, or `None` when the set is at capacity and `key` has no entry yet.
    pub(crate) fn join(&mut self, key: &Key) -> Option<Arc<Condvar>> {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.waiters += 1;
            return Some(Arc::clone(&entry.cond));
        }
        if self.is_full() {
            return None;
        }
        let cond = Arc::new(Condvar::new());
        self.entries.insert(
            key.clone(),
            WaitEntry {
                cond: Arc::clone(&cond),
                waiters: 1,
            },
        );
        Some(cond)
    }

    /// Leaves the wait set after waking. The last waiter removes the entry;
    /// earlier waiters pass the wakeup along to the next in line.
    pub(crate) fn leave(&mut self, key: &Key) {
        let Some(entry) = self.entries.get_mut(key) else {
            return;
        };
        if entry.waiters > 1 {
            entry.waiters -= 1;
            entry.cond.notify_one();
        } else {
            self.entries.remove(key);
        }
    }

    /// Wakes one waiter for `key`, if any. Called by the task completing the
    /// key's fetch.
    pub(crate) fn signal(&self, key: &Key) {
        if let Some(entry) = self.entries.get(key) {
            entry.cond.notify_one();
        }
    }
}
