use thiserror::Error;

/// Errors produced by the queue and table backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Propagated from the SQLite backend.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed while opening the database.
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// A stored row could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Ack/release presented a receipt that no longer owns the message
    /// (already acknowledged, or the visibility timeout expired and the
    /// message was handed to another consumer).
    #[error("receipt for message {message_id} is no longer valid")]
    InvalidReceipt { message_id: String },

    /// The backend cannot serve requests right now.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}
