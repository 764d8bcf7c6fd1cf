//! Partition+key JSON cache with a fixed freshness window.
//!
//! Entries are never invalidated explicitly. An entry older than the window
//! simply reads as missing until the next `put` replaces it.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::error::StoreError;
use crate::storage::KeyedStore;
use crate::types::Entity;

const JSON_PROPERTY: &str = "Json";

/// Default freshness window: five minutes.
pub const DEFAULT_FRESHNESS: Duration = Duration::from_secs(300);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CacheKeyError {
    #[error("cache key must look like `partition:key`, got {0:?}")]
    MissingSeparator(String),

    #[error("cache key {0:?} has an empty partition or key")]
    EmptyPart(String),
}

/// `partition:key` address of a cache entry. Only the first `:` separates,
/// so keys may themselves contain colons.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub partition: String,
    pub key: String,
}

impl FromStr for CacheKey {
    type Err = CacheKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (partition, key) = s
            .split_once(':')
            .ok_or_else(|| CacheKeyError::MissingSeparator(s.to_owned()))?;
        if partition.is_empty() || key.is_empty() {
            return Err(CacheKeyError::EmptyPart(s.to_owned()));
        }
        Ok(Self {
            partition: partition.to_owned(),
            key: key.to_owned(),
        })
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.partition, self.key)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub partition: String,
    pub key: String,
    pub timestamp: DateTime<Utc>,
    pub json: Value,
}

impl CacheEntry {
    pub fn is_fresh_at(&self, now: DateTime<Utc>, freshness: Duration) -> bool {
        let age = now.signed_duration_since(self.timestamp);
        // Clock skew can make an entry look like it comes from the future.
        age.to_std().map_or(true, |age| age <= freshness)
    }
}

pub struct CacheStore {
    table: Arc<dyn KeyedStore>,
    freshness: Duration,
}

impl CacheStore {
    pub fn new(table: Arc<dyn KeyedStore>, freshness: Duration) -> Self {
        Self { table, freshness }
    }

    /// Returns `None` for a missing or stale entry.
    pub async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, StoreError> {
        let Some(entity) = self.table.get(&key.partition, &key.key).await? else {
            return Ok(None);
        };
        let raw = entity.string_property(JSON_PROPERTY).unwrap_or("null");
        let entry = CacheEntry {
            partition: entity.partition_key.clone(),
            key: entity.row_key.clone(),
            timestamp: entity.timestamp,
            json: serde_json::from_str(raw)?,
        };

        if !entry.is_fresh_at(Utc::now(), self.freshness) {
            debug!(%key, timestamp = %entry.timestamp, "cache entry is stale");
            return Ok(None);
        }
        Ok(Some(entry))
    }

    /// Replace whatever is stored at `key` and restart its freshness window.
    pub async fn put(&self, key: &CacheKey, json: Value) -> Result<CacheEntry, StoreError> {
        let entity = Entity::new(key.partition.clone(), key.key.clone())
            .with_property(JSON_PROPERTY, serde_json::to_string(&json)?);
        let timestamp = entity.timestamp;
        self.table.upsert(entity).await?;
        debug!(%key, "cache entry written");

        Ok(CacheEntry {
            partition: key.partition.clone(),
            key: key.key.clone(),
            timestamp,
            json,
        })
    }
}
