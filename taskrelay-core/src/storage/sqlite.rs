//! SQLite implementation of [`TaskQueue`] and [`KeyedStore`].
//!
//! Uses [`sqlx`] with the `sqlite` feature. Migrations are run automatically
//! by [`SqliteBackend::connect`].
//!
//! # Migrations path
//!
//! `sqlx::migrate!("./migrations")` resolves the path **at compile time**
//! relative to `CARGO_MANIFEST_DIR`, so the SQL files are embedded into the
//! binary. The database location is chosen at runtime.
//!
//! # Queries
//!
//! The runtime-checked `sqlx::query` form is used so that no `DATABASE_URL`
//! is needed at compile time.
//!
//! Every queue and table shares one pair of physical tables, discriminated by
//! a `queue` / `table_name` column, so opening a new logical queue needs no
//! schema change.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{KeyedStore, QueueMessage, Receipt, ReceivedMessage, TaskQueue};
use crate::error::StoreError;
use crate::types::Entity;

/// Shared connection pool for all SQLite-backed queues and tables.
#[derive(Clone, Debug)]
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    /// Open (or create) the database at `url` and run pending migrations.
    ///
    /// `url` is a sqlx SQLite URL such as `"sqlite://taskrelay.db"`, or
    /// `"sqlite::memory:"` for tests. In-memory databases are pinned to a
    /// single long-lived connection because every new connection would see
    /// an empty database.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool_options = if url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(8)
        };
        let pool = pool_options.connect_with(options).await?;
        // Path is resolved relative to CARGO_MANIFEST_DIR at compile time.
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn queue(&self, name: impl Into<String>) -> SqliteQueue {
        SqliteQueue {
            pool: self.pool.clone(),
            name: name.into(),
        }
    }

    pub fn table(&self, name: impl Into<String>) -> SqliteTable {
        SqliteTable {
            pool: self.pool.clone(),
            name: name.into(),
        }
    }
}

fn parse_timestamp(raw: &str, column: &str) -> DateTime<Utc> {
    raw.parse().unwrap_or_else(|e: chrono::ParseError| {
        tracing::warn!(raw = %raw, column, error = %e, "failed to parse stored timestamp; using now");
        Utc::now()
    })
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

type MessageRow = (String, String, i64, String);

fn to_message((id, body, dequeue_count, enqueued_at): MessageRow) -> QueueMessage {
    QueueMessage {
        id,
        body,
        dequeue_count: u32::try_from(dequeue_count).unwrap_or(u32::MAX),
        enqueued_at: parse_timestamp(&enqueued_at, "enqueued_at"),
    }
}

/// A named logical queue stored in the `queue_messages` table.
#[derive(Clone, Debug)]
pub struct SqliteQueue {
    pool: SqlitePool,
    name: String,
}

#[async_trait]
impl TaskQueue for SqliteQueue {
    async fn enqueue(&self, body: String) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO queue_messages (queue, id, body, enqueued_at, visible_at, dequeue_count) \
             VALUES (?1, ?2, ?3, ?4, ?5, 0)",
        )
        .bind(&self.name)
        .bind(&id)
        .bind(&body)
        .bind(now.to_rfc3339())
        .bind(now.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    async fn peek(&self, limit: usize) -> Result<Vec<QueueMessage>, StoreError> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT id, body, dequeue_count, enqueued_at FROM queue_messages \
             WHERE queue = ?1 AND visible_at <= ?2 ORDER BY seq LIMIT ?3",
        )
        .bind(&self.name)
        .bind(Utc::now().timestamp_millis())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(to_message).collect())
    }

    async fn receive(&self, visibility_timeout: Duration) -> Result<Option<ReceivedMessage>, StoreError> {
        let now = Utc::now().timestamp_millis();
        let pop_receipt = Uuid::new_v4().to_string();
        // Single statement, so the claim is atomic under concurrent consumers.
        let row: Option<MessageRow> = sqlx::query_as(
            "UPDATE queue_messages \
             SET visible_at = ?1, dequeue_count = dequeue_count + 1, pop_receipt = ?2 \
             WHERE seq = (SELECT seq FROM queue_messages \
                          WHERE queue = ?3 AND visible_at <= ?4 ORDER BY seq LIMIT 1) \
             RETURNING id, body, dequeue_count, enqueued_at",
        )
        .bind(now.saturating_add(millis(visibility_timeout)))
        .bind(&pop_receipt)
        .bind(&self.name)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| {
            let message = to_message(row);
            let receipt = Receipt {
                message_id: message.id.clone(),
                pop_receipt,
            };
            ReceivedMessage { message, receipt }
        }))
    }

    async fn ack(&self, receipt: &Receipt) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM queue_messages WHERE queue = ?1 AND id = ?2 AND pop_receipt = ?3")
            .bind(&self.name)
            .bind(&receipt.message_id)
            .bind(&receipt.pop_receipt)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::InvalidReceipt {
                message_id: receipt.message_id.clone(),
            });
        }
        Ok(())
    }

    async fn release(&self, receipt: &Receipt) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE queue_messages SET visible_at = ?1, pop_receipt = NULL \
             WHERE queue = ?2 AND id = ?3 AND pop_receipt = ?4",
        )
        .bind(Utc::now().timestamp_millis())
        .bind(&self.name)
        .bind(&receipt.message_id)
        .bind(&receipt.pop_receipt)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::InvalidReceipt {
                message_id: receipt.message_id.clone(),
            });
        }
        Ok(())
    }
}

/// A named logical table stored in the `entities` table.
#[derive(Clone, Debug)]
pub struct SqliteTable {
    pool: SqlitePool,
    name: String,
}

#[async_trait]
impl KeyedStore for SqliteTable {
    async fn get(&self, partition_key: &str, row_key: &str) -> Result<Option<Entity>, StoreError> {
        let row: Option<(String, String)> = sqlx::query_as(
            "SELECT properties, updated_at FROM entities \
             WHERE table_name = ?1 AND partition_key = ?2 AND row_key = ?3",
        )
        .bind(&self.name)
        .bind(partition_key)
        .bind(row_key)
        .fetch_optional(&self.pool)
        .await?;

        let Some((properties, updated_at)) = row else {
            return Ok(None);
        };
        let properties: Map<String, Value> = serde_json::from_str(&properties)?;
        Ok(Some(Entity {
            partition_key: partition_key.to_owned(),
            row_key: row_key.to_owned(),
            timestamp: parse_timestamp(&updated_at, "updated_at"),
            properties,
        }))
    }

    async fn upsert(&self, entity: Entity) -> Result<(), StoreError> {
        let properties = serde_json::to_string(&entity.properties)?;
        sqlx::query(
            "INSERT INTO entities (table_name, partition_key, row_key, properties, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(table_name, partition_key, row_key) DO UPDATE \
             SET properties = excluded.properties, updated_at = excluded.updated_at",
        )
        .bind(&self.name)
        .bind(&entity.partition_key)
        .bind(&entity.row_key)
        .bind(&properties)
        .bind(entity.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_if_absent(&self, entity: Entity) -> Result<bool, StoreError> {
        let properties = serde_json::to_string(&entity.properties)?;
        let done = sqlx::query(
            "INSERT INTO entities (table_name, partition_key, row_key, properties, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(table_name, partition_key, row_key) DO NOTHING",
        )
        .bind(&self.name)
        .bind(&entity.partition_key)
        .bind(&entity.row_key)
        .bind(&properties)
        .bind(entity.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn backend() -> SqliteBackend {
        SqliteBackend::connect("sqlite::memory:").await.expect("in-memory sqlite")
    }

    #[tokio::test]
    async fn queue_round_trip_with_receipts() {
        let backend = backend().await;
        let queue = backend.queue("tasks");
        let id = queue.enqueue("first".into()).await.unwrap();
        queue.enqueue("second".into()).await.unwrap();

        let peeked = queue.peek(1).await.unwrap();
        assert_eq!(peeked.len(), 1);
        assert_eq!(peeked[0].id, id);
        assert_eq!(peeked[0].dequeue_count, 0);

        let received = queue.receive(Duration::from_secs(30)).await.unwrap().unwrap();
        assert_eq!(received.message.body, "first");
        assert_eq!(received.message.dequeue_count, 1);

        let visible = queue.peek(10).await.unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].body, "second");

        queue.ack(&received.receipt).await.unwrap();
        assert!(matches!(
            queue.ack(&received.receipt).await,
            Err(StoreError::InvalidReceipt { .. })
        ));
    }

    #[tokio::test]
    async fn released_message_is_redelivered_with_higher_count() {
        let backend = backend().await;
        let queue = backend.queue("tasks");
        queue.enqueue("only".into()).await.unwrap();

        let first = queue.receive(Duration::from_secs(30)).await.unwrap().unwrap();
        assert!(queue.receive(Duration::from_secs(30)).await.unwrap().is_none());
        queue.release(&first.receipt).await.unwrap();

        let second = queue.receive(Duration::from_secs(30)).await.unwrap().unwrap();
        assert_eq!(second.message.id, first.message.id);
        assert_eq!(second.message.dequeue_count, 2);
    }

    #[tokio::test]
    async fn queues_are_isolated_by_name() {
        let backend = backend().await;
        backend.queue("tasks").enqueue("t".into()).await.unwrap();
        assert!(backend.queue("tasks-poison").peek(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn table_upsert_replaces() {
        let backend = backend().await;
        let table = backend.table("results");
        table
            .upsert(Entity::new("Results-DEBUG", "t1").with_property("Output", ""))
            .await
            .unwrap();
        table
            .upsert(Entity::new("Results-DEBUG", "t1").with_property("Output", "{\"ok\":true}"))
            .await
            .unwrap();

        let entity = table.get("Results-DEBUG", "t1").await.unwrap().unwrap();
        assert_eq!(entity.string_property("Output"), Some("{\"ok\":true}"));
        assert!(backend.table("cache").get("Results-DEBUG", "t1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn table_insert_if_absent_does_not_overwrite() {
        let backend = backend().await;
        let table = backend.table("results");
        let done = Entity::new("Results-DEBUG", "t1").with_property("Output", "{\"ok\":true}");
        table.upsert(done).await.unwrap();

        let placeholder = Entity::new("Results-DEBUG", "t1").with_property("Output", "");
        assert!(!table.insert_if_absent(placeholder.clone()).await.unwrap());
        let entity = table.get("Results-DEBUG", "t1").await.unwrap().unwrap();
        assert_eq!(entity.string_property("Output"), Some("{\"ok\":true}"));

        let fresh = Entity { row_key: "t2".into(), ..placeholder };
        assert!(table.insert_if_absent(fresh).await.unwrap());
        assert!(table.get("Results-DEBUG", "t2").await.unwrap().is_some());
    }
}
