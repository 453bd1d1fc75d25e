//! Explicit cancellation signal attached to a request.
//!
//! A [`CancelToken`] is shared between the caller (which fires it on client disconnect or a
//! deadline) and the queue set (which removes the request from its queue when it fires). Firing
//! is idempotent; callbacks registered before the first `cancel` run exactly once, after the
//! token's own lock has been released. A token may outlive many requests, so each registration
//! is keyed and removed again once its request has been decided.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

type Callback = Box<dyn FnOnce() + Send>;

struct Inner {
    cancelled: AtomicBool,
    callbacks: Mutex<Registry>,
}

#[derive(Default)]
struct Registry {
    next_key: u64,
    hooks: HashMap<u64, Callback>,
}

/// Cloneable cancellation flag with on-cancel hooks.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                callbacks: Mutex::new(Registry::default()),
            }),
        }
    }

    /// Fire the token. Only the first call runs the registered callbacks.
    pub fn cancel(&self) {
        let callbacks = {
            let mut guard = self.inner.callbacks.lock();
            if self.inner.cancelled.swap(true, Ordering::AcqRel) {
                return;
            }
            std::mem::take(&mut guard.hooks)
        };
        for (_, callback) in callbacks {
            callback();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Register a hook to run when the token fires and return its key.
    ///
    /// Returns `None` (dropping `callback` without running it) when the token has already been
    /// cancelled, so the caller can take the cancel path itself without re-entering any lock it
    /// might hold.
    pub(crate) fn on_cancel(&self, callback: impl FnOnce() + Send + 'static) -> Option<u64> {
        let mut guard = self.inner.callbacks.lock();
        if self.inner.cancelled.load(Ordering::Acquire) {
            return None;
        }
        let key = guard.next_key;
        guard.next_key += 1;
        guard.hooks.insert(key, Box::new(callback));
        Some(key)
    }

    /// Drop a registered hook without running it. Unknown keys are ignored.
    pub(crate) fn deregister(&self, key: u64) {
        self.inner.callbacks.lock().hooks.remove(&key);
    }

    /// Hooks still waiting for the token to fire.
    pub fn pending_hooks(&self) -> usize {
        self.inner.callbacks.lock().hooks.len()
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
