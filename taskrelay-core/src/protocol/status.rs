use std::sync::Arc;

use tracing::debug;

use crate::error::StoreError;
use crate::storage::{KeyedStore, TaskQueue};
use crate::types::{TaskRequest, TaskResult, TaskState, TaskType};

/// Where a task currently is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskStatusReport {
    pub task_id: String,
    pub task_type: TaskType,
    pub state: TaskState,
}

/// Answers status queries by checking the result store first and then
/// peeking the queue.
///
/// The queue scan is bounded by `peek_limit`: a task buried deeper than that
/// in a long queue reports as unknown rather than queued.
pub struct TaskStatusService {
    queue: Arc<dyn TaskQueue>,
    results: Arc<dyn KeyedStore>,
    peek_limit: usize,
}

impl TaskStatusService {
    pub fn new(queue: Arc<dyn TaskQueue>, results: Arc<dyn KeyedStore>, peek_limit: usize) -> Self {
        Self {
            queue,
            results,
            peek_limit,
        }
    }

    /// Returns `None` when the task is neither in the result store nor among
    /// the first `peek_limit` visible queue messages.
    pub async fn status(&self, task_type: TaskType, task_id: &str) -> Result<Option<TaskStatusReport>, StoreError> {
        let report = |state| TaskStatusReport {
            task_id: task_id.to_owned(),
            task_type,
            state,
        };

        if let Some(result) = self.result(task_type, task_id).await? {
            return Ok(Some(report(result.state())));
        }

        if self.is_queued(task_type, task_id).await? {
            return Ok(Some(report(TaskState::Queued)));
        }

        Ok(None)
    }

    pub async fn result(&self, task_type: TaskType, task_id: &str) -> Result<Option<TaskResult>, StoreError> {
        let entity = self
            .results
            .get(&TaskResult::partition_key(task_type), task_id)
            .await?;
        Ok(entity.map(|e| TaskResult::from_entity(task_type, &e)))
    }

    async fn is_queued(&self, task_type: TaskType, task_id: &str) -> Result<bool, StoreError> {
        let pending = self.queue.peek(self.peek_limit).await?;
        Ok(pending.iter().any(|message| {
            match TaskRequest::from_message_body(&message.body) {
                Ok(request) => request.task_type == task_type && request.task_id == task_id,
                Err(e) => {
                    debug!(message_id = %message.id, error = %e, "skipping undecodable message during peek");
                    false
                }
            }
        }))
    }
}
