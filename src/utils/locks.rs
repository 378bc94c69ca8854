use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap = DashMap<String, Arc<Mutex<()>>>;

/// Async mutexes keyed by record path (`users/{id}`, `withdrawals/{id}`, ...),
/// shared by every handler. A handler holds the guard across the whole
/// load, validate, save sequence on that record.
///
/// Locks are taken outer record first: device, then request or payment, then
/// user. Nothing takes a device or request lock while holding a user lock.
#[derive(Clone, Default)]
pub struct KeyLocks {
    locks: Arc<LockMap>,
}

/// Held lock. The registry entry is dropped with the last guard for its key.
pub struct KeyGuard {
    key: String,
    locks: Arc<LockMap>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: impl Into<String>) -> KeyGuard {
        let key = key.into();
        let lock = self.locks.entry(key.clone()).or_default().clone();
        let guard = lock.lock_owned().await;

        KeyGuard {
            key,
            locks: self.locks.clone(),
            guard: Some(guard),
        }
    }

    pub async fn lock_user(&self, user_id: &str) -> KeyGuard {
        self.lock(format!("users/{}", user_id)).await
    }

    /// Number of keys currently locked or waited on.
    pub fn len(&self) -> usize {
        self.locks.len()
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the registry's own handle left: no holder and no waiter.
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}
