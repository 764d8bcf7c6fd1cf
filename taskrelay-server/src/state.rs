//! Shared application state injected into every Axum handler, plus the
//! storage wiring it is built from.

use std::sync::Arc;

use taskrelay_core::cache::CacheStore;
use taskrelay_core::protocol::callback::CallbackNotifier;
use taskrelay_core::protocol::processor::TaskProcessor;
use taskrelay_core::protocol::status::TaskStatusService;
use taskrelay_core::protocol::submit::TaskSubmitter;
use taskrelay_core::protocol::worker::Worker;
use taskrelay_core::storage::memory::{MemoryQueue, MemoryStore};
use taskrelay_core::storage::sqlite::SqliteBackend;
use taskrelay_core::{KeyedStore, StoreError, TaskQueue};
use tokio_util::sync::CancellationToken;

use crate::config::Config;

pub const TASK_QUEUE: &str = "tasks";
pub const DEAD_LETTER_QUEUE: &str = "tasks-poison";
pub const RESULTS_TABLE: &str = "results";
pub const CACHE_TABLE: &str = "cache";

/// The queues and tables the server runs on.
#[derive(Clone)]
pub struct Backends {
    pub queue: Arc<dyn TaskQueue>,
    pub dead_letters: Arc<dyn TaskQueue>,
    pub results: Arc<dyn KeyedStore>,
    pub cache: Arc<dyn KeyedStore>,
}

impl Backends {
    /// Open the backends named by `config.database_url`.
    pub async fn open(config: &Config) -> Result<Self, StoreError> {
        if config.uses_memory_backend() {
            return Ok(Self::memory());
        }
        let db = SqliteBackend::connect(&config.database_url).await?;
        Ok(Self {
            queue: Arc::new(db.queue(TASK_QUEUE)),
            dead_letters: Arc::new(db.queue(DEAD_LETTER_QUEUE)),
            results: Arc::new(db.table(RESULTS_TABLE)),
            cache: Arc::new(db.table(CACHE_TABLE)),
        })
    }

    pub fn memory() -> Self {
        Self {
            queue: Arc::new(MemoryQueue::new()),
            dead_letters: Arc::new(MemoryQueue::new()),
            results: Arc::new(MemoryStore::new()),
            cache: Arc::new(MemoryStore::new()),
        }
    }

    pub fn worker(
        &self,
        config: &Config,
        processor: Arc<dyn TaskProcessor>,
        callback: Arc<dyn CallbackNotifier>,
    ) -> Worker {
        Worker::new(
            self.queue.clone(),
            self.dead_letters.clone(),
            self.results.clone(),
            processor,
            callback,
            config.protocol(),
        )
    }
}

/// State shared across all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration (env-derived).
    pub config: Arc<Config>,
    pub submitter: Arc<TaskSubmitter>,
    pub status: Arc<TaskStatusService>,
    pub cache: Arc<CacheStore>,
    pub dead_letters: Arc<dyn TaskQueue>,
    /// Fires on shutdown; in-flight submissions stop waiting and answer 202.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: Config, backends: &Backends, shutdown: CancellationToken) -> Self {
        let protocol = config.protocol();
        Self {
            submitter: Arc::new(TaskSubmitter::new(
                backends.queue.clone(),
                backends.results.clone(),
                protocol.clone(),
            )),
            status: Arc::new(TaskStatusService::new(
                backends.queue.clone(),
                backends.results.clone(),
                protocol.peek_limit,
            )),
            cache: Arc::new(CacheStore::new(backends.cache.clone(), config.cache_freshness)),
            dead_letters: backends.dead_letters.clone(),
            config: Arc::new(config),
            shutdown,
        }
    }
}
