//! Listener registry for push-style notifications
//!
//! Connectivity transitions and sync status snapshots are fanned out to
//! registered callbacks. Callbacks run synchronously on the notifying task
//! and must not block.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Handle returned by [`Listeners::add`], used to unregister
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Ordered set of callbacks receiving `&T`
pub struct Listeners<T> {
    next_id: AtomicU64,
    entries: Mutex<Vec<(ListenerId, Callback<T>)>>,
}

impl<T> Listeners<T> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Registers `callback`; it is invoked in registration order
    pub fn add<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((id, Arc::new(callback)));
        id
    }

    /// Unregisters a listener; returns `false` if it was not registered
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    /// Calls every registered listener with `value`
    ///
    /// The registry lock is released before the callbacks run, so a
    /// callback may add or remove listeners.
    pub fn notify(&self, value: &T) {
        let callbacks: Vec<Callback<T>> = self.lock().iter().map(|(_, cb)| cb.clone()).collect();
        for callback in callbacks {
            callback(value);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(ListenerId, Callback<T>)>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Listeners<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners").field("len", &self.len()).finish()
    }
}
