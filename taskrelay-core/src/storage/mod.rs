//! Storage capabilities the task protocol is built on.
//!
//! [`TaskQueue`] models an ordered, at-least-once message queue and
//! [`KeyedStore`] a partition+key addressed table with replace-semantics
//! upserts. Two implementations ship with the crate:
//!
//! - [`memory`]: process-local, used by tests and `memory://` deployments.
//! - [`sqlite`]: durable, backed by [`sqlx`] with embedded migrations.
//!
//! To run the protocol on another backend, implement both traits for the new
//! type and hand it to the services in [`crate::protocol`]; no service code
//! changes.

pub mod memory;
pub mod sqlite;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::types::Entity;

/// A pending message as seen by [`TaskQueue::peek`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub id: String,
    pub body: String,
    /// How many times the message has been handed out by `receive`.
    pub dequeue_count: u32,
    pub enqueued_at: DateTime<Utc>,
}

/// Proof of a single delivery; required to ack or release that delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub message_id: String,
    pub pop_receipt: String,
}

/// A message handed out by [`TaskQueue::receive`].
///
/// The message stays in the queue, invisible to other consumers, until it is
/// acknowledged, released, or its visibility timeout expires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub message: QueueMessage,
    pub receipt: Receipt,
}

/// Ordered, at-least-once message queue.
#[async_trait]
pub trait TaskQueue: Send + Sync + 'static {
    /// Append a message and return its id.
    async fn enqueue(&self, body: String) -> Result<String, StoreError>;

    /// Inspect up to `limit` visible messages in queue order without
    /// claiming them or bumping their dequeue count.
    async fn peek(&self, limit: usize) -> Result<Vec<QueueMessage>, StoreError>;

    /// Claim the oldest visible message, hiding it for `visibility_timeout`.
    async fn receive(&self, visibility_timeout: Duration) -> Result<Option<ReceivedMessage>, StoreError>;

    /// Delete a claimed message.
    async fn ack(&self, receipt: &Receipt) -> Result<(), StoreError>;

    /// Make a claimed message visible again immediately.
    async fn release(&self, receipt: &Receipt) -> Result<(), StoreError>;
}

/// Partition+key addressed table.
#[async_trait]
pub trait KeyedStore: Send + Sync + 'static {
    async fn get(&self, partition_key: &str, row_key: &str) -> Result<Option<Entity>, StoreError>;

    /// Insert or fully replace the entity at its (partition, row) key.
    async fn upsert(&self, entity: Entity) -> Result<(), StoreError>;

    /// Insert the entity only if its key is free. Returns `false`, leaving
    /// the stored row untouched, when the key is already taken.
    async fn insert_if_absent(&self, entity: Entity) -> Result<bool, StoreError>;
}
