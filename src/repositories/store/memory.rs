use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::{broadcast, RwLock};

use super::{
    insert, lookup, merge, normalize_path, spawn_subscription, ChangeHandler, RemoteStore,
    StoreEvent, Subscription,
};

/// Process-local store holding the whole tree in memory.
pub struct MemoryStore {
    root: RwLock<Value>,
    events: broadcast::Sender<StoreEvent>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(1024);

        Self {
            root: RwLock::new(Value::Object(Map::new())),
            events,
        }
    }

    fn publish(&self, path: String, value: Option<Value>) {
        // No receivers is not an error.
        let _ = self.events.send(StoreEvent { path, value });
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn get(&self, path: &str) -> Result<Option<Value>, anyhow::Error> {
        let root = self.root.read().await;
        Ok(lookup(&root, path).cloned())
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), anyhow::Error> {
        let path = normalize_path(path);
        let current = {
            let mut root = self.root.write().await;
            insert(&mut root, &path, value);
            lookup(&root, &path).cloned()
        };

        self.publish(path, current);
        Ok(())
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<(), anyhow::Error> {
        let path = normalize_path(path);
        let current = {
            let mut root = self.root.write().await;
            let merged = merge(lookup(&root, &path).cloned(), fields);
            insert(&mut root, &path, merged);
            lookup(&root, &path).cloned()
        };

        self.publish(path, current);
        Ok(())
    }

    fn subscribe(&self, path: &str, on_change: ChangeHandler) -> Subscription {
        spawn_subscription(self.events.subscribe(), path, on_change)
    }
}
