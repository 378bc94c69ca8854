use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{Map, Value};
use sqlx::postgres::{PgListener, PgPool};
use sqlx::PgConnection;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{
    insert, lookup, merge, normalize_path, segments, spawn_subscription, ChangeHandler,
    RemoteStore, StoreEvent, Subscription,
};

const NOTIFY_CHANNEL: &str = "coinfarm_store";

/// Store backed by a single Postgres table of `path -> JSON` rows.
///
/// A row never has another row at one of its ancestor paths: writing below an
/// existing row edits that row in place, writing above rows replaces them.
/// Changes are announced with `NOTIFY` so other processes' subscribers fire.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    events: broadcast::Sender<StoreEvent>,
    instance: String,
}

impl PgStore {
    pub async fn new(pool: PgPool) -> Result<Self, anyhow::Error> {
        sqlx::query(include_str!("../../../migrations/0001_store_entries.sql"))
            .execute(&pool)
            .await?;

        let (events, _) = broadcast::channel(1024);

        Ok(Self {
            pool,
            events,
            instance: Uuid::new_v4().hyphenated().to_string(),
        })
    }

    /// Relays writes made by other processes to local subscribers.
    pub async fn start_listener(&self) -> Result<(), anyhow::Error> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(NOTIFY_CHANNEL).await?;
        let store = self.clone();

        tokio::spawn(async move {
            let notifications = listener.into_stream();
            futures_util::pin_mut!(notifications);

            while let Some(notification) = notifications.next().await {
                match notification {
                    Ok(notification) => {
                        let Some((origin, path)) = notification.payload().split_once('|') else {
                            log::warn!("Malformed store notification: {}", notification.payload());
                            continue;
                        };
                        if origin == store.instance {
                            continue;
                        }
                        match store.get(path).await {
                            Ok(value) => store.publish(path.to_string(), value),
                            Err(e) => log::warn!("Could not reload '{}' after notify: {}", path, e),
                        }
                    }
                    Err(e) => {
                        log::error!("Store listener error: {}", e);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }

            log::warn!("Store listener stopped.");
        });

        log::info!("Store change listener started");
        Ok(())
    }

    fn publish(&self, path: String, value: Option<Value>) {
        let _ = self.events.send(StoreEvent { path, value });
    }

    async fn notify(&self, conn: &mut PgConnection, path: &str) -> Result<(), anyhow::Error> {
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(NOTIFY_CHANNEL)
            .bind(format!("{}|{}", self.instance, path))
            .execute(conn)
            .await?;
        Ok(())
    }
}

fn escape_like(path: &str) -> String {
    path.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn ancestors(path: &str) -> Vec<String> {
    let parts = segments(path);
    (1..parts.len()).map(|n| parts[..n].join("/")).collect()
}

async fn fetch(conn: &mut PgConnection, path: &str) -> Result<Option<Value>, anyhow::Error> {
    let rows: Vec<(String, String)> = if path.is_empty() {
        sqlx::query_as("SELECT path, value FROM store_entries ORDER BY length(path)")
            .fetch_all(&mut *conn)
            .await?
    } else {
        sqlx::query_as(
            r#"SELECT path, value FROM store_entries
            WHERE path = $1 OR path LIKE $2 OR path = ANY($3)
            ORDER BY length(path)"#,
        )
        .bind(path)
        .bind(format!("{}/%", escape_like(path)))
        .bind(ancestors(path))
        .fetch_all(&mut *conn)
        .await?
    };

    let mut root = Value::Object(Map::new());
    for (row_path, row_value) in rows {
        insert(&mut root, &row_path, serde_json::from_str(&row_value)?);
    }

    Ok(lookup(&root, path).cloned())
}

async fn write(conn: &mut PgConnection, path: &str, value: &Value) -> Result<(), anyhow::Error> {
    let ancestor: Option<(String, String)> = sqlx::query_as(
        "SELECT path, value FROM store_entries WHERE path = ANY($1) ORDER BY length(path) DESC LIMIT 1",
    )
    .bind(ancestors(path))
    .fetch_optional(&mut *conn)
    .await?;

    let (row_path, row_value) = match ancestor {
        Some((ancestor_path, ancestor_value)) => {
            let mut tree: Value = serde_json::from_str(&ancestor_value)?;
            let relative = &path[ancestor_path.len() + 1..];
            insert(&mut tree, relative, value.clone());
            (ancestor_path, tree)
        }
        None => {
            sqlx::query("DELETE FROM store_entries WHERE path = $1 OR path LIKE $2")
                .bind(path)
                .bind(format!("{}/%", escape_like(path)))
                .execute(&mut *conn)
                .await?;
            (path.to_string(), value.clone())
        }
    };

    if row_value.is_null() || row_value.as_object().is_some_and(|m| m.is_empty()) {
        sqlx::query("DELETE FROM store_entries WHERE path = $1")
            .bind(&row_path)
            .execute(&mut *conn)
            .await?;
    } else {
        sqlx::query(
            r#"INSERT INTO store_entries (path, value, updated_at)
            VALUES ($1, $2, CURRENT_TIMESTAMP)
            ON CONFLICT (path) DO UPDATE SET value = EXCLUDED.value, updated_at = CURRENT_TIMESTAMP"#,
        )
        .bind(&row_path)
        .bind(row_value.to_string())
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

#[async_trait]
impl RemoteStore for PgStore {
    async fn get(&self, path: &str) -> Result<Option<Value>, anyhow::Error> {
        let path = normalize_path(path);
        let mut conn = self.pool.acquire().await?;
        fetch(&mut conn, &path).await
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), anyhow::Error> {
        let path = normalize_path(path);
        if path.is_empty() {
            bail!("Refusing to overwrite the store root");
        }

        let mut tx = self.pool.begin().await?;
        write(&mut tx, &path, &value).await?;
        self.notify(&mut tx, &path).await?;
        tx.commit().await?;

        self.publish(path, Some(value).filter(|v| !v.is_null()));
        Ok(())
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<(), anyhow::Error> {
        let path = normalize_path(path);
        if path.is_empty() {
            bail!("Refusing to update the store root");
        }

        let mut tx = self.pool.begin().await?;
        let merged = merge(fetch(&mut tx, &path).await?, fields);
        write(&mut tx, &path, &merged).await?;
        self.notify(&mut tx, &path).await?;
        tx.commit().await?;

        self.publish(path, Some(merged));
        Ok(())
    }

    fn subscribe(&self, path: &str, on_change: ChangeHandler) -> Subscription {
        spawn_subscription(self.events.subscribe(), path, on_change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ancestors() {
        assert_eq!(
            ancestors("referrals/a/r1"),
            vec!["referrals".to_string(), "referrals/a".to_string()]
        );
        assert!(ancestors("users").is_empty());
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("user_tasks/50%"), "user\\_tasks/50\\%");
    }
}
