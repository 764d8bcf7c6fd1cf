use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::ProtocolConfig;
use super::callback::{CallbackBody, CallbackNotifier};
use super::processor::{ProcessError, TaskProcessor};
use crate::error::StoreError;
use crate::storage::{KeyedStore, QueueMessage, ReceivedMessage, TaskQueue};
use crate::types::{DeadLetter, TaskRequest, TaskResult};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to persist result for task {task_id}: {source}")]
    Persist {
        task_id: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to dead-letter message {message_id}: {source}")]
    DeadLetter {
        message_id: String,
        #[source]
        source: StoreError,
    },

    #[error("task {task_id} failed: {source}")]
    Process {
        task_id: String,
        #[source]
        source: ProcessError,
    },
}

/// What should happen to a message after one processing pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Result persisted; ack.
    Completed,
    /// A redelivery of a task that already has its result; ack.
    AlreadyProcessed,
    /// Moved to the dead-letter queue; ack.
    DeadLettered,
    /// Interrupted by shutdown; make visible again.
    Released,
}

impl Disposition {
    pub fn should_ack(&self) -> bool {
        !matches!(self, Disposition::Released)
    }
}

/// Processes delivered task messages.
///
/// Results are written at the task's own key: the placeholder only into an
/// empty slot, the final row as a replace-semantics upsert. A message that is
/// redelivered, even concurrently with itself, converges to the same
/// persisted result.
pub struct Worker {
    queue: Arc<dyn TaskQueue>,
    dead_letters: Arc<dyn TaskQueue>,
    results: Arc<dyn KeyedStore>,
    processor: Arc<dyn TaskProcessor>,
    callback: Arc<dyn CallbackNotifier>,
    config: ProtocolConfig,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        dead_letters: Arc<dyn TaskQueue>,
        results: Arc<dyn KeyedStore>,
        processor: Arc<dyn TaskProcessor>,
        callback: Arc<dyn CallbackNotifier>,
        config: ProtocolConfig,
    ) -> Self {
        Self {
            queue,
            dead_letters,
            results,
            processor,
            callback,
            config,
        }
    }

    /// Receive loop. Returns once `cancel` fires; an in-flight task sees the
    /// same token and releases its message.
    pub async fn run(&self, cancel: CancellationToken) {
        info!("worker started");
        while !cancel.is_cancelled() {
            match self.queue.receive(self.config.visibility_timeout).await {
                Ok(Some(received)) => self.dispatch(received, &cancel).await,
                Ok(None) => self.idle(&cancel).await,
                Err(e) => {
                    warn!(error = %e, "queue receive failed");
                    self.idle(&cancel).await;
                }
            }
        }
        info!("worker stopped");
    }

    async fn idle(&self, cancel: &CancellationToken) {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(self.config.idle_backoff) => {}
        }
    }

    /// Run one pass over `received` and settle the delivery with the queue.
    ///
    /// On error the message is left alone: it becomes visible again when its
    /// visibility timeout expires and is retried until `max_deliveries`.
    pub async fn dispatch(&self, received: ReceivedMessage, cancel: &CancellationToken) {
        let span = info_span!(
            "worker_pass",
            message_id = %received.message.id,
            dequeue_count = received.message.dequeue_count,
        );
        async {
            match self.handle(&received, cancel).await {
                Ok(disposition) if disposition.should_ack() => {
                    if let Err(e) = self.queue.ack(&received.receipt).await {
                        warn!(error = %e, "failed to acknowledge message; it will be redelivered");
                    }
                }
                Ok(_) => {
                    if let Err(e) = self.queue.release(&received.receipt).await {
                        warn!(error = %e, "failed to release message");
                    }
                }
                Err(e) => warn!(error = %e, "processing pass failed; message will be redelivered"),
            }
        }
        .instrument(span)
        .await
    }

    /// One processing pass over a delivered message. Does not ack.
    pub async fn handle(&self, received: &ReceivedMessage, cancel: &CancellationToken) -> Result<Disposition, WorkerError> {
        let message = &received.message;
        let request = match TaskRequest::from_message_body(&message.body) {
            Ok(request) => request,
            Err(e) => {
                error!(error = %e, "undecodable task message; dead-lettering");
                self.dead_letter(message, format!("undecodable task message: {e}")).await?;
                return Ok(Disposition::DeadLettered);
            }
        };
        let task_id = request.task_id.as_str();
        let partition = TaskResult::partition_key(request.task_type);

        match self.results.get(&partition, task_id).await {
            Ok(Some(entity)) if TaskResult::from_entity(request.task_type, &entity).is_processed() => {
                info!(task_id, "task already processed; acknowledging redelivery");
                return Ok(Disposition::AlreadyProcessed);
            }
            Ok(_) => {}
            Err(e) => warn!(task_id, error = %e, "could not read existing result; processing anyway"),
        }

        if message.dequeue_count > self.config.max_deliveries {
            let reason = format!(
                "gave up after {} delivery attempts",
                message.dequeue_count.saturating_sub(1)
            );
            warn!(task_id, %reason, "redelivery limit exceeded; failing task");
            self.persist(TaskResult::failed(request.task_type, task_id, &reason)).await?;
            self.dead_letter(message, reason).await?;
            return Ok(Disposition::DeadLettered);
        }

        // A concurrent delivery may have finished since the read above; never
        // overwrite its row with an empty placeholder.
        let placeholder = TaskResult::placeholder(request.task_type, task_id);
        match self.results.insert_if_absent(placeholder.to_entity()).await {
            Ok(true) => {}
            Ok(false) => debug!(task_id, "result row already present; placeholder skipped"),
            Err(e) => warn!(task_id, error = %e, "failed to write processing placeholder; continuing"),
        }

        let output = match self.processor.process(&request, cancel).await {
            Ok(output) => output,
            Err(ProcessError::Cancelled) => {
                info!(task_id, "processing interrupted by shutdown; releasing message");
                return Ok(Disposition::Released);
            }
            Err(source) => {
                return Err(WorkerError::Process {
                    task_id: task_id.to_owned(),
                    source,
                });
            }
        };

        let result = TaskResult::completed(request.task_type, task_id, output);
        self.persist(result.clone()).await?;
        info!(task_id, task_type = %request.task_type, "task processed");

        if let Some(url) = &request.callback_url {
            self.notify(url, &request, &result).await;
        }
        Ok(Disposition::Completed)
    }

    async fn persist(&self, result: TaskResult) -> Result<(), WorkerError> {
        let task_id = result.task_id.clone();
        self.results
            .upsert(result.to_entity())
            .await
            .map_err(|source| WorkerError::Persist { task_id, source })
    }

    async fn dead_letter(&self, message: &QueueMessage, reason: String) -> Result<(), WorkerError> {
        let letter = DeadLetter {
            message_id: message.id.clone(),
            body: message.body.clone(),
            reason,
            dequeue_count: message.dequeue_count,
            dead_lettered_at: Utc::now(),
        };
        let to_store_error = |source: StoreError| WorkerError::DeadLetter {
            message_id: message.id.clone(),
            source,
        };
        let body = serde_json::to_string(&letter).map_err(|e| to_store_error(e.into()))?;
        self.dead_letters.enqueue(body).await.map_err(to_store_error)?;
        Ok(())
    }

    async fn notify(&self, url: &str, request: &TaskRequest, result: &TaskResult) {
        let body = CallbackBody {
            task_id: request.task_id.clone(),
            task_type: request.task_type,
            result: result.decoded_output().unwrap_or_default(),
        };
        match self.callback.notify(url, &body).await {
            Ok(()) => debug!(task_id = %request.task_id, url, "callback delivered"),
            Err(e) => warn!(task_id = %request.task_id, url, error = %e, "callback failed; result remains available"),
        }
    }
}
