use std::sync::Arc;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ProtocolConfig;
use crate::error::StoreError;
use crate::storage::{KeyedStore, TaskQueue};
use crate::types::{TaskRequest, TaskResult, TaskType};

/// Route prefix under which task status is served; deferred responses point
/// at `{status_base_url}{STATUS_PATH_PREFIX}/{type}/{taskId}`.
pub const STATUS_PATH_PREFIX: &str = "/v1/tasks/get";

#[derive(Debug, Error)]
pub enum SubmitError {
    /// The caller sent something that can never be enqueued.
    #[error("invalid task request: {0}")]
    InvalidRequest(String),

    #[error("failed to encode task request: {0}")]
    Encode(#[from] serde_json::Error),

    /// The queue rejected the message; nothing was enqueued.
    #[error("failed to enqueue task: {0}")]
    Enqueue(#[from] StoreError),
}

/// What a client asks for; the server turns it into a [`TaskRequest`] by
/// assigning the task id.
#[derive(Debug, Clone)]
pub struct TaskDraft {
    pub task_type: TaskType,
    pub payload: String,
    pub callback_url: Option<String>,
}

#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    /// The worker finished inside the polling window.
    Completed { task_id: String, result: TaskResult },
    /// Still running; the client should follow `status_url`.
    Accepted {
        task_id: String,
        task_type: TaskType,
        status_url: String,
    },
}

impl SubmitOutcome {
    pub fn task_id(&self) -> &str {
        match self {
            SubmitOutcome::Completed { task_id, .. } | SubmitOutcome::Accepted { task_id, .. } => task_id,
        }
    }
}

pub fn status_url(base_url: &str, task_type: TaskType, task_id: &str) -> String {
    format!(
        "{}{STATUS_PATH_PREFIX}/{task_type}/{task_id}",
        base_url.trim_end_matches('/')
    )
}

fn validate_callback_url(raw: &str) -> Result<(), SubmitError> {
    let url = reqwest::Url::parse(raw)
        .map_err(|e| SubmitError::InvalidRequest(format!("callbackUrl '{raw}' is not a valid URL: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(SubmitError::InvalidRequest(format!(
            "callbackUrl scheme '{other}' is not supported; use http or https"
        ))),
    }
}

/// Accepts tasks, enqueues them, and waits a bounded time for the result.
pub struct TaskSubmitter {
    queue: Arc<dyn TaskQueue>,
    results: Arc<dyn KeyedStore>,
    config: ProtocolConfig,
}

impl TaskSubmitter {
    pub fn new(queue: Arc<dyn TaskQueue>, results: Arc<dyn KeyedStore>, config: ProtocolConfig) -> Self {
        Self { queue, results, config }
    }

    /// Enqueue `draft` under a fresh task id, then wait up to
    /// `submit_timeout` for a processed result.
    ///
    /// Only the enqueue can fail the call; polling errors are logged and
    /// treated as "not ready". Cancelling `cancel` ends the wait early and
    /// yields [`SubmitOutcome::Accepted`].
    pub async fn submit(&self, draft: TaskDraft, cancel: &CancellationToken) -> Result<SubmitOutcome, SubmitError> {
        if let Some(url) = &draft.callback_url {
            validate_callback_url(url)?;
        }

        let request = TaskRequest::new(draft.task_type, draft.payload, draft.callback_url);
        let body = request.to_message_body()?;
        let message_id = self.queue.enqueue(body).await?;
        info!(
            task_id = %request.task_id,
            task_type = %request.task_type,
            message_id = %message_id,
            "task enqueued"
        );

        match self.wait_for_result(request.task_type, &request.task_id, cancel).await {
            Some(result) => {
                info!(task_id = %request.task_id, "task completed within the polling window");
                Ok(SubmitOutcome::Completed {
                    task_id: request.task_id,
                    result,
                })
            }
            None => Ok(SubmitOutcome::Accepted {
                status_url: status_url(&self.config.status_base_url, request.task_type, &request.task_id),
                task_id: request.task_id,
                task_type: request.task_type,
            }),
        }
    }

    /// Poll the result store every `poll_interval` until a processed result
    /// appears, the deadline passes, or `cancel` fires.
    pub async fn wait_for_result(
        &self,
        task_type: TaskType,
        task_id: &str,
        cancel: &CancellationToken,
    ) -> Option<TaskResult> {
        let partition = TaskResult::partition_key(task_type);
        let deadline = Instant::now() + self.config.submit_timeout;

        loop {
            match self.results.get(&partition, task_id).await {
                Ok(Some(entity)) => {
                    let result = TaskResult::from_entity(task_type, &entity);
                    if result.is_processed() {
                        return Some(result);
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(task_id, error = %e, "result poll failed; treating as not ready"),
            }

            let now = Instant::now();
            if now >= deadline {
                debug!(task_id, "polling window elapsed");
                return None;
            }
            let nap = self.config.poll_interval.min(deadline - now);
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(task_id, "wait cancelled");
                    return None;
                }
                _ = tokio::time::sleep(nap) => {}
            }
        }
    }
}
