use std::sync::Arc;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// A write observed at `path`. `value` is the new value there, `None` when removed.
#[derive(Clone, Debug, PartialEq)]
pub struct StoreEvent {
    pub path: String,
    pub value: Option<Value>,
}

pub type ChangeHandler = Arc<dyn Fn(StoreEvent) + Send + Sync>;

/// Live subscription; dropping it unsubscribes.
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        self.task.abort();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Hierarchical key-value store shared by every client. Paths are
/// `/`-separated; writes are last-write-wins.
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    async fn get(&self, path: &str) -> Result<Option<Value>, anyhow::Error>;

    /// Overwrites the whole subtree at `path`. `Value::Null` removes it.
    async fn set(&self, path: &str, value: Value) -> Result<(), anyhow::Error>;

    /// Shallow merge of `fields` into the object at `path`. Null fields are removed.
    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<(), anyhow::Error>;

    /// Calls `on_change` for every write at, below or above `path`,
    /// including writes made through this store.
    fn subscribe(&self, path: &str, on_change: ChangeHandler) -> Subscription;
}

pub fn normalize_path(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

pub fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Whether a write at `written` changes anything visible at `watched`.
pub fn affects(written: &str, watched: &str) -> bool {
    if watched.is_empty() || written == watched {
        return true;
    }
    written.starts_with(&format!("{watched}/")) || watched.starts_with(&format!("{written}/"))
}

pub fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    segments(path)
        .into_iter()
        .try_fold(root, |node, segment| node.get(segment))
        .filter(|v| !v.is_null())
}

/// Writes `value` at `path` inside `root`, creating intermediate objects and
/// pruning objects left empty by a removal.
pub fn insert(root: &mut Value, path: &str, value: Value) {
    let parts = segments(path);
    if parts.is_empty() {
        *root = if value.is_null() {
            Value::Object(Map::new())
        } else {
            value
        };
        return;
    }
    insert_at(root, &parts, value);
}

fn insert_at(node: &mut Value, parts: &[&str], value: Value) {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    let Value::Object(map) = node else {
        return;
    };

    let (head, rest) = (parts[0], &parts[1..]);
    if rest.is_empty() {
        if value.is_null() {
            map.remove(head);
        } else {
            map.insert(head.to_string(), value);
        }
        return;
    }

    if value.is_null() && !map.contains_key(head) {
        return;
    }
    let child = map
        .entry(head.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    insert_at(child, rest, value);
    if child.as_object().is_some_and(|m| m.is_empty()) {
        map.remove(head);
    }
}

/// Shallow merge used by `update`.
pub fn merge(current: Option<Value>, fields: Map<String, Value>) -> Value {
    let mut merged = match current {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };
    for (key, value) in fields {
        if value.is_null() {
            merged.remove(&key);
        } else {
            merged.insert(key, value);
        }
    }
    Value::Object(merged)
}

/// Forwards matching events from a broadcast channel to `on_change`.
pub(crate) fn spawn_subscription(
    mut receiver: broadcast::Receiver<StoreEvent>,
    path: &str,
    on_change: ChangeHandler,
) -> Subscription {
    let watched = normalize_path(path);

    let task = tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    if affects(&event.path, &watched) {
                        on_change(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("Subscription on '{}' skipped {} events", watched, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    Subscription { task }
}

pub async fn get_as<T: DeserializeOwned>(
    store: &dyn RemoteStore,
    path: &str,
) -> Result<Option<T>, anyhow::Error> {
    match store.get(path).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Children of the object at `path`, skipping entries that fail to decode.
pub async fn list_as<T: DeserializeOwned>(
    store: &dyn RemoteStore,
    path: &str,
) -> Result<Vec<T>, anyhow::Error> {
    let Some(Value::Object(children)) = store.get(path).await? else {
        return Ok(Vec::new());
    };

    let items = children
        .into_iter()
        .filter_map(|(key, value)| match serde_json::from_value(value) {
            Ok(item) => Some(item),
            Err(e) => {
                log::warn!("Skipping malformed entry {}/{}: {}", path, key, e);
                None
            }
        })
        .collect();

    Ok(items)
}

pub async fn set_as<T: Serialize + ?Sized>(
    store: &dyn RemoteStore,
    path: &str,
    value: &T,
) -> Result<(), anyhow::Error> {
    store.set(path, serde_json::to_value(value)?).await
}
