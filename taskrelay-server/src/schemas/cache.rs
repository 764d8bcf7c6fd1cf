use serde::Serialize;
use taskrelay_core::cache::CacheEntry;
use utoipa::ToSchema;

/// Acknowledgement of a cache write.
#[derive(Debug, Serialize, ToSchema)]
pub struct CacheWriteResponse {
    pub partition: String,
    pub key: String,
    /// RFC 3339 time the entry was written; its freshness window starts here.
    pub timestamp: String,
}

impl From<CacheEntry> for CacheWriteResponse {
    fn from(entry: CacheEntry) -> Self {
        Self {
            partition: entry.partition,
            key: entry.key,
            timestamp: entry.timestamp.to_rfc3339(),
        }
    }
}
