//! Single-assignment synchronization cell.
//!
//! [`WriteOnce`] holds a value that is written exactly once by the dispatcher and read by any
//! number of waiters. Blocking readers park on a `parking_lot` condition variable, async readers
//! on a `tokio` [`Notify`]. A second write is a scheduler bug and panics.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// Write-once cell with broadcast wake-up.
///
/// The cell starts empty. [`WriteOnce::set`] publishes a value and wakes every waiter, blocking
/// or async. Readers never observe a partially written or replaced value.
#[derive(Debug)]
pub struct WriteOnce<T> {
    /// Published value, `None` until the single write happens
    value: Mutex<Option<T>>,
    /// Blocking readers wait here
    written: Condvar,
    /// Async readers wait here
    notify: Notify,
}

impl<T: Clone> WriteOnce<T> {
    /// Create an empty cell.
    pub fn new() -> Self {
        Self {
            value: Mutex::new(None),
            written: Condvar::new(),
            notify: Notify::new(),
        }
    }

    /// Publish the value and wake all readers.
    ///
    /// # Panics
    /// Panics if the cell already holds a value.
    pub fn set(&self, value: T) {
        {
            let mut guard = self.value.lock();
            assert!(guard.is_none(), "WriteOnce cell written twice");
            *guard = Some(value);
        }
        self.written.notify_all();
        self.notify.notify_waiters();
    }

    /// Non-blocking peek.
    pub fn get(&self) -> Option<T> {
        self.value.lock().clone()
    }

    /// Whether the value has been published.
    pub fn is_set(&self) -> bool {
        self.value.lock().is_some()
    }

    /// Block the calling thread until the value is published.
    pub fn wait(&self) -> T {
        let mut guard = self.value.lock();
        loop {
            if let Some(value) = guard.as_ref() {
                return value.clone();
            }
            self.written.wait(&mut guard);
        }
    }

    /// Block until the value is published or `timeout` elapses.
    ///
    /// Returns `None` on timeout. Spurious wake-ups are absorbed by re-checking against a fixed
    /// deadline.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.value.lock();
        loop {
            if let Some(value) = guard.as_ref() {
                return Some(value.clone());
            }
            if self.written.wait_until(&mut guard, deadline).timed_out() {
                return guard.clone();
            }
        }
    }

    /// Wait for the value without blocking an async runtime thread.
    pub async fn wait_async(&self) -> T {
        loop {
            // Register interest before checking so a concurrent `set` cannot slip between the
            // check and the await.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(value) = self.get() {
                return value;
            }
            notified.await;
        }
    }
}

impl<T: Clone> Default for WriteOnce<T> {
    fn default() -> Self {
        Self::new()
    }
}
