//! The asynchronous task protocol.
//!
//! ```text
//!   client ──submit──▶ TaskSubmitter ──enqueue──▶ TaskQueue ──receive──▶ Worker
//!     ▲                    │ poll                                         │
//!     │ 200 / 202          ▼                                              ▼
//!     └──────────────── KeyedStore (Results-{type}, taskId) ◀──upsert─────┘
//! ```
//!
//! - [`submit::TaskSubmitter`] assigns ids, enqueues and long-polls for a
//!   bounded window.
//! - [`status::TaskStatusService`] answers "where is task X".
//! - [`worker::Worker`] runs one processing pass per delivered message.
//!
//! All services take their storage as trait objects so they can be wired to
//! the in-memory or SQLite backends interchangeably.

pub mod callback;
pub mod processor;
pub mod status;
pub mod submit;
pub mod worker;

#[cfg(test)]
mod tests;

use std::time::Duration;

/// Tunables shared by the protocol services.
///
/// All fields have sensible defaults via [`Default`].
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    /// Delay between result-store checks while a submission waits.
    /// Defaults to 500 ms.
    pub poll_interval: Duration,
    /// How long a submission waits for a result before answering 202.
    /// Defaults to 3 s.
    pub submit_timeout: Duration,
    /// Maximum number of queue messages inspected by a status lookup.
    /// Defaults to `64`.
    pub peek_limit: usize,
    /// Deliveries after which a message is failed and dead-lettered.
    /// Defaults to `5`.
    pub max_deliveries: u32,
    /// How long a received message stays hidden from other workers.
    /// Defaults to 30 s.
    pub visibility_timeout: Duration,
    /// Worker sleep when the queue is empty. Defaults to 1 s.
    pub idle_backoff: Duration,
    /// Prefix for status URLs handed out in deferred responses; empty means
    /// relative URLs. Defaults to `""`.
    pub status_base_url: String,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            submit_timeout: Duration::from_secs(3),
            peek_limit: 64,
            max_deliveries: 5,
            visibility_timeout: Duration::from_secs(30),
            idle_backoff: Duration::from_secs(1),
            status_base_url: String::new(),
        }
    }
}
