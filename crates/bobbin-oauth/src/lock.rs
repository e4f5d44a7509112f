//! Named locks.
//!
//! One FIFO mutex per key, created on first use and dropped once nobody holds
//! or waits for it.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use smol_str::SmolStr;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
pub struct LockTable {
    locks: DashMap<SmolStr, Arc<Mutex<()>>>,
}

struct Ticket<'t> {
    locks: &'t DashMap<SmolStr, Arc<Mutex<()>>>,
    key: SmolStr,
    mutex: Arc<Mutex<()>>,
}

impl<'t> Ticket<'t> {
    fn take(locks: &'t DashMap<SmolStr, Arc<Mutex<()>>>, key: &str) -> Self {
        let mutex = locks.entry(SmolStr::new(key)).or_default().value().clone();
        Self {
            locks,
            key: SmolStr::new(key),
            mutex,
        }
    }
}

impl Drop for Ticket<'_> {
    fn drop(&mut self) {
        // The map and this ticket are the last two owners.
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) <= 2);
    }
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `body` while holding the lock for `key`.
    ///
    /// Callers for the same key run one at a time in arrival order; different
    /// keys do not contend. The lock is released when `body` finishes, fails,
    /// or is dropped mid-flight.
    pub async fn with_lock<F, T>(&self, key: &str, body: F) -> T
    where
        F: Future<Output = T>,
    {
        let ticket = Ticket::take(&self.locks, key);
        let _guard = ticket.mutex.lock().await;
        #[cfg(feature = "tracing")]
        tracing::trace!(key, "lock acquired");
        body.await
    }

    /// Number of keys currently locked or waited on.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
