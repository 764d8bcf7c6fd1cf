use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::types::TaskRequest;

#[derive(Debug, Error)]
pub enum ProcessError {
    /// The host is shutting down; the message should be redelivered.
    #[error("processing cancelled")]
    Cancelled,

    /// The attempt failed; the queue's redelivery decides whether to retry.
    #[error("processing failed: {0}")]
    Failed(String),
}

/// The work performed for a single task.
///
/// Implementations must be safe to run more than once for the same request:
/// the queue delivers at least once.
#[async_trait]
pub trait TaskProcessor: Send + Sync + 'static {
    /// Returns the task output as an opaque JSON string.
    async fn process(&self, request: &TaskRequest, cancel: &CancellationToken) -> Result<String, ProcessError>;
}

/// Stands in for real computation with a bounded delay.
///
/// The RNG is seeded from the task id, so a task always sleeps the same
/// amount and produces the same output, however often it is delivered.
#[derive(Debug, Clone)]
pub struct SimulatedProcessor {
    min_delay: Duration,
    max_delay: Duration,
}

impl SimulatedProcessor {
    pub fn new(min_delay: Duration, max_delay: Duration) -> Self {
        let (min_delay, max_delay) = if min_delay <= max_delay {
            (min_delay, max_delay)
        } else {
            (max_delay, min_delay)
        };
        Self { min_delay, max_delay }
    }

    pub fn delay_for(&self, task_id: &str) -> Duration {
        let lo = u64::try_from(self.min_delay.as_millis()).unwrap_or(u64::MAX);
        let hi = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);
        let mut rng = StdRng::seed_from_u64(seed_for(task_id));
        Duration::from_millis(rng.random_range(lo..=hi))
    }
}

fn seed_for(task_id: &str) -> u64 {
    match Uuid::parse_str(task_id) {
        Ok(uuid) => {
            let (hi, lo) = uuid.as_u64_pair();
            hi ^ lo
        }
        Err(_) => {
            let mut hasher = DefaultHasher::new();
            task_id.hash(&mut hasher);
            hasher.finish()
        }
    }
}

#[async_trait]
impl TaskProcessor for SimulatedProcessor {
    async fn process(&self, request: &TaskRequest, cancel: &CancellationToken) -> Result<String, ProcessError> {
        let delay = self.delay_for(&request.task_id);
        tokio::select! {
            _ = cancel.cancelled() => return Err(ProcessError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }

        let output = json!({
            "taskId": request.task_id,
            "type": request.task_type,
            "payload": request.payload,
            "payloadLength": request.payload.chars().count(),
            "delayMs": u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
        });
        Ok(output.to_string())
    }
}
