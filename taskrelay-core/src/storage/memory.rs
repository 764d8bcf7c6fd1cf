//! Process-local implementations of [`TaskQueue`] and [`KeyedStore`].
//!
//! State lives behind a `std::sync::Mutex`; no lock is ever held across an
//! `.await`, so the blocking mutex is fine inside async code.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::Instant;
use uuid::Uuid;

use super::{KeyedStore, QueueMessage, Receipt, ReceivedMessage, TaskQueue};
use crate::error::StoreError;
use crate::types::Entity;

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, StoreError> {
    mutex
        .lock()
        .map_err(|_| StoreError::Unavailable("in-memory storage lock poisoned".to_owned()))
}

#[derive(Debug)]
struct Slot {
    id: String,
    body: String,
    enqueued_at: DateTime<Utc>,
    visible_at: Instant,
    dequeue_count: u32,
    pop_receipt: Option<String>,
}

impl Slot {
    fn to_message(&self) -> QueueMessage {
        QueueMessage {
            id: self.id.clone(),
            body: self.body.clone(),
            dequeue_count: self.dequeue_count,
            enqueued_at: self.enqueued_at,
        }
    }
}

/// In-memory FIFO queue with visibility timeouts and pop receipts.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    slots: Mutex<Vec<Slot>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages still in the queue, visible or not.
    pub fn len(&self) -> usize {
        self.slots.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TaskQueue for MemoryQueue {
    async fn enqueue(&self, body: String) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        lock(&self.slots)?.push(Slot {
            id: id.clone(),
            body,
            enqueued_at: Utc::now(),
            visible_at: Instant::now(),
            dequeue_count: 0,
            pop_receipt: None,
        });
        Ok(id)
    }

    async fn peek(&self, limit: usize) -> Result<Vec<QueueMessage>, StoreError> {
        let now = Instant::now();
        Ok(lock(&self.slots)?
            .iter()
            .filter(|s| s.visible_at <= now)
            .take(limit)
            .map(Slot::to_message)
            .collect())
    }

    async fn receive(&self, visibility_timeout: Duration) -> Result<Option<ReceivedMessage>, StoreError> {
        let now = Instant::now();
        let mut slots = lock(&self.slots)?;
        let Some(slot) = slots.iter_mut().find(|s| s.visible_at <= now) else {
            return Ok(None);
        };
        let pop_receipt = Uuid::new_v4().to_string();
        slot.visible_at = now + visibility_timeout;
        slot.dequeue_count += 1;
        slot.pop_receipt = Some(pop_receipt.clone());
        Ok(Some(ReceivedMessage {
            message: slot.to_message(),
            receipt: Receipt {
                message_id: slot.id.clone(),
                pop_receipt,
            },
        }))
    }

    async fn ack(&self, receipt: &Receipt) -> Result<(), StoreError> {
        let mut slots = lock(&self.slots)?;
        let position = slots
            .iter()
            .position(|s| s.id == receipt.message_id && s.pop_receipt.as_deref() == Some(&receipt.pop_receipt))
            .ok_or_else(|| StoreError::InvalidReceipt {
                message_id: receipt.message_id.clone(),
            })?;
        slots.remove(position);
        Ok(())
    }

    async fn release(&self, receipt: &Receipt) -> Result<(), StoreError> {
        let mut slots = lock(&self.slots)?;
        let slot = slots
            .iter_mut()
            .find(|s| s.id == receipt.message_id && s.pop_receipt.as_deref() == Some(&receipt.pop_receipt))
            .ok_or_else(|| StoreError::InvalidReceipt {
                message_id: receipt.message_id.clone(),
            })?;
        slot.visible_at = Instant::now();
        slot.pop_receipt = None;
        Ok(())
    }
}

/// In-memory keyed table.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: Mutex<HashMap<(String, String), Entity>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyedStore for MemoryStore {
    async fn get(&self, partition_key: &str, row_key: &str) -> Result<Option<Entity>, StoreError> {
        Ok(lock(&self.rows)?
            .get(&(partition_key.to_owned(), row_key.to_owned()))
            .cloned())
    }

    async fn upsert(&self, entity: Entity) -> Result<(), StoreError> {
        let key = (entity.partition_key.clone(), entity.row_key.clone());
        lock(&self.rows)?.insert(key, entity);
        Ok(())
    }

    async fn insert_if_absent(&self, entity: Entity) -> Result<bool, StoreError> {
        let key = (entity.partition_key.clone(), entity.row_key.clone());
        match lock(&self.rows)?.entry(key) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(entity);
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn receive_hides_message_until_released() {
        let queue = MemoryQueue::new();
        queue.enqueue("a".into()).await.unwrap();
        queue.enqueue("b".into()).await.unwrap();

        let first = queue.receive(Duration::from_secs(30)).await.unwrap().unwrap();
        assert_eq!(first.message.body, "a");
        assert_eq!(first.message.dequeue_count, 1);

        // "a" is invisible now, so peek and receive both move on to "b".
        let peeked = queue.peek(10).await.unwrap();
        assert_eq!(peeked.len(), 1);
        assert_eq!(peeked[0].body, "b");

        queue.release(&first.receipt).await.unwrap();
        let again = queue.receive(Duration::from_secs(30)).await.unwrap().unwrap();
        assert_eq!(again.message.body, "a");
        assert_eq!(again.message.dequeue_count, 2);
    }

    #[tokio::test]
    async fn expired_visibility_redelivers_and_invalidates_old_receipt() {
        let queue = MemoryQueue::new();
        queue.enqueue("a".into()).await.unwrap();

        let first = queue.receive(Duration::from_millis(1)).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = queue.receive(Duration::from_secs(30)).await.unwrap().unwrap();
        assert_eq!(second.message.id, first.message.id);

        let err = queue.ack(&first.receipt).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidReceipt { .. }));
        queue.ack(&second.receipt).await.unwrap();
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn peek_does_not_claim() {
        let queue = MemoryQueue::new();
        for i in 0..5 {
            queue.enqueue(format!("m{i}")).await.unwrap();
        }
        let peeked = queue.peek(3).await.unwrap();
        assert_eq!(peeked.iter().map(|m| m.body.as_str()).collect::<Vec<_>>(), ["m0", "m1", "m2"]);
        assert!(peeked.iter().all(|m| m.dequeue_count == 0));
        assert_eq!(queue.peek(10).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn upsert_replaces_whole_entity() {
        let store = MemoryStore::new();
        store
            .upsert(Entity::new("p", "k").with_property("A", 1).with_property("B", 2))
            .await
            .unwrap();
        store.upsert(Entity::new("p", "k").with_property("A", 3)).await.unwrap();

        let entity = store.get("p", "k").await.unwrap().unwrap();
        assert_eq!(entity.properties.get("A"), Some(&serde_json::json!(3)));
        assert!(entity.properties.get("B").is_none());
        assert!(store.get("p", "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn insert_if_absent_keeps_existing_row() {
        let store = MemoryStore::new();
        assert!(store.insert_if_absent(Entity::new("p", "k").with_property("A", 1)).await.unwrap());
        assert!(!store.insert_if_absent(Entity::new("p", "k").with_property("A", 2)).await.unwrap());

        let entity = store.get("p", "k").await.unwrap().unwrap();
        assert_eq!(entity.properties.get("A"), Some(&serde_json::json!(1)));
    }
}
