//! Failure listener registry
//!
//! Listeners are notified synchronously, in registration order, whenever a
//! token fetch fails. The registry holds no behavioral dependency on its
//! listeners: a panicking callback is isolated so the remaining listeners
//! still run, and the transport itself never consults the listener set.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Callback invoked with the failure description
pub type FailureCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Opaque handle identifying a registered listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Thread-safe registry of authentication failure listeners
#[derive(Default)]
pub struct FailureListeners {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, FailureCallback)>>,
}

impl FailureListeners {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener; returns the handle needed to unsubscribe
    pub fn subscribe<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut listeners = self.listeners.lock().expect("listener registry poisoned");
        listeners.push((id, Arc::new(callback)));
        id
    }

    /// Remove a listener; removing an unregistered id is a no-op
    pub fn unsubscribe(&self, id: ListenerId) {
        let mut listeners = self.listeners.lock().expect("listener registry poisoned");
        listeners.retain(|(listener_id, _)| *listener_id != id);
    }

    /// Number of currently registered listeners
    pub fn len(&self) -> usize {
        self.listeners.lock().expect("listener registry poisoned").len()
    }

    /// Check whether no listeners are registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Notify every registered listener, in registration order
    ///
    /// Callbacks run on the caller's thread. Each invocation is isolated:
    /// a panicking listener does not prevent later listeners from running.
    pub fn notify(&self, description: &str) {
        // Snapshot under the lock so a callback may subscribe/unsubscribe
        // without deadlocking the registry.
        let snapshot: Vec<FailureCallback> = {
            let listeners = self.listeners.lock().expect("listener registry poisoned");
            listeners.iter().map(|(_, cb)| Arc::clone(cb)).collect()
        };

        for callback in snapshot {
            if catch_unwind(AssertUnwindSafe(|| callback(description))).is_err() {
                warn!("authentication failure listener panicked");
            }
        }
    }
}

impl std::fmt::Debug for FailureListeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailureListeners")
            .field("listeners", &self.len())
            .finish()
    }
}
