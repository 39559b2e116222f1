//! Condition variables for async mutex-guarded state.
//!
//! `tokio` ships no condition variable, so [`Condvar`] provides the classic
//! wait/notify protocol on top of [`Notify`] for state behind a
//! [`tokio::sync::Mutex`]. A waiter registers interest *before* releasing its
//! guard, so a notification arriving between release and sleep is never
//! lost. As with any condition variable, waits belong inside a loop that
//! re-checks the predicate.

use tokio::sync::{Mutex, MutexGuard, Notify};

/// A condition variable bound at each wait site to the mutex guarding the
/// shared state.
#[derive(Debug, Default)]
pub(crate) struct Condvar {
    notify: Notify,
}

impl Condvar {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Atomically releases `guard`, waits for a notification, and re-acquires
    /// the lock on `mutex`.
    ///
    /// `mutex` must be the mutex `guard` was taken from.
    pub(crate) async fn wait<'a, T>(
        &self,
        guard: MutexGuard<'a, T>,
        mutex: &'a Mutex<T>,
    ) -> MutexGuard<'a, T> {
        let notified = self.notify.notified();
        drop(guard);
        notified.await;
        mutex.lock().await
    }

    /// Wakes one waiter, or stores the wakeup for the next one to arrive.
    pub(crate) fn notify_one(&self) {
        self.notify.notify_one();
    }

    /// Wakes every currently registered waiter.
    pub(crate) fn notify_all(&self) {
        self.notify.notify_waiters();
    }
}
