use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::models::users::NewUser;
use crate::repositories::store::{ChangeHandler, MemoryStore, RemoteStore, Subscription};

pub fn identity(id: &str) -> NewUser {
    NewUser {
        id: id.to_string(),
        username: Some(format!("user{}", id)),
        first_name: None,
        last_name: None,
        referral_code: None,
    }
}

/// Memory store that yields on every call, like a networked store, and whose
/// writes can be made to fail.
pub struct FlakyStore {
    pub inner: MemoryStore,
    pub writes: AtomicU32,
    failures: AtomicU32,
    offline: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Self::failing(0)
    }

    /// Fails the next `failures` writes.
    pub fn failing(failures: u32) -> Arc<Self> {
        Arc::new(FlakyStore {
            inner: MemoryStore::new(),
            writes: AtomicU32::new(0),
            failures: AtomicU32::new(failures),
            offline: AtomicBool::new(false),
        })
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_write(&self) -> Result<(), anyhow::Error> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            anyhow::bail!("network unavailable");
        }
        let pending = self.failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.failures.store(pending - 1, Ordering::SeqCst);
            anyhow::bail!("permission denied");
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for FlakyStore {
    async fn get(&self, path: &str) -> Result<Option<Value>, anyhow::Error> {
        tokio::task::yield_now().await;
        self.inner.get(path).await
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), anyhow::Error> {
        tokio::task::yield_now().await;
        self.check_write()?;
        self.inner.set(path, value).await
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<(), anyhow::Error> {
        tokio::task::yield_now().await;
        self.check_write()?;
        self.inner.update(path, fields).await
    }

    fn subscribe(&self, path: &str, on_change: ChangeHandler) -> Subscription {
        self.inner.subscribe(path, on_change)
    }
}
