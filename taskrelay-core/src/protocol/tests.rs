use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing_test::traced_test;

use super::ProtocolConfig;
use super::callback::{CallbackBody, CallbackError, CallbackNotifier};
use super::processor::{ProcessError, SimulatedProcessor, TaskProcessor};
use super::status::TaskStatusService;
use super::submit::{SubmitError, SubmitOutcome, TaskDraft, TaskSubmitter};
use super::worker::{Disposition, Worker, WorkerError};
use crate::error::StoreError;
use crate::storage::memory::{MemoryQueue, MemoryStore};
use crate::storage::{KeyedStore, QueueMessage, Receipt, ReceivedMessage, TaskQueue};
use crate::types::{DeadLetter, Entity, TaskRequest, TaskResult, TaskState, TaskType};

// ── Fakes ─────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct RecordingCallback {
    calls: Mutex<Vec<(String, CallbackBody)>>,
}

#[async_trait]
impl CallbackNotifier for RecordingCallback {
    async fn notify(&self, url: &str, body: &CallbackBody) -> Result<(), CallbackError> {
        self.calls.lock().unwrap().push((url.to_owned(), body.clone()));
        Ok(())
    }
}

struct FailingCallback;

#[async_trait]
impl CallbackNotifier for FailingCallback {
    async fn notify(&self, _url: &str, _body: &CallbackBody) -> Result<(), CallbackError> {
        Err(CallbackError::Status { status: 503 })
    }
}

/// Blocks inside `process` until released, so tests can observe the
/// in-flight state.
#[derive(Default)]
struct GateProcessor {
    started: Notify,
    release: Notify,
}

#[async_trait]
impl TaskProcessor for GateProcessor {
    async fn process(&self, _request: &TaskRequest, cancel: &CancellationToken) -> Result<String, ProcessError> {
        self.started.notify_one();
        tokio::select! {
            _ = cancel.cancelled() => Err(ProcessError::Cancelled),
            _ = self.release.notified() => Ok(r#"{"gated":true}"#.to_owned()),
        }
    }
}

struct FailingProcessor;

#[async_trait]
impl TaskProcessor for FailingProcessor {
    async fn process(&self, _request: &TaskRequest, _cancel: &CancellationToken) -> Result<String, ProcessError> {
        Err(ProcessError::Failed("simulated failure".into()))
    }
}

/// Result store that fails on demand: the first `read_failures` reads, and
/// every placeholder insert or upsert while the matching flag is set.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    read_failures: AtomicUsize,
    fail_inserts: AtomicBool,
    fail_upserts: AtomicBool,
}

#[async_trait]
impl KeyedStore for FlakyStore {
    async fn get(&self, partition_key: &str, row_key: &str) -> Result<Option<Entity>, StoreError> {
        let left = self.read_failures.load(Ordering::SeqCst);
        if left > 0 {
            self.read_failures.store(left - 1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("flaky read".into()));
        }
        self.inner.get(partition_key, row_key).await
    }

    async fn upsert(&self, entity: Entity) -> Result<(), StoreError> {
        if self.fail_upserts.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("flaky upsert".into()));
        }
        self.inner.upsert(entity).await
    }

    async fn insert_if_absent(&self, entity: Entity) -> Result<bool, StoreError> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("flaky insert".into()));
        }
        self.inner.insert_if_absent(entity).await
    }
}

/// Reads always miss, as if another delivery finished right after the
/// worker looked.
#[derive(Default)]
struct LaggingReadStore {
    inner: MemoryStore,
}

#[async_trait]
impl KeyedStore for LaggingReadStore {
    async fn get(&self, _partition_key: &str, _row_key: &str) -> Result<Option<Entity>, StoreError> {
        Ok(None)
    }

    async fn upsert(&self, entity: Entity) -> Result<(), StoreError> {
        self.inner.upsert(entity).await
    }

    async fn insert_if_absent(&self, entity: Entity) -> Result<bool, StoreError> {
        self.inner.insert_if_absent(entity).await
    }
}

struct DownQueue;

#[async_trait]
impl TaskQueue for DownQueue {
    async fn enqueue(&self, _body: String) -> Result<String, StoreError> {
        Err(StoreError::Unavailable("queue offline".into()))
    }
    async fn peek(&self, _limit: usize) -> Result<Vec<QueueMessage>, StoreError> {
        Err(StoreError::Unavailable("queue offline".into()))
    }
    async fn receive(&self, _visibility_timeout: Duration) -> Result<Option<ReceivedMessage>, StoreError> {
        Err(StoreError::Unavailable("queue offline".into()))
    }
    async fn ack(&self, _receipt: &Receipt) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("queue offline".into()))
    }
    async fn release(&self, _receipt: &Receipt) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("queue offline".into()))
    }
}

// ── Harness ───────────────────────────────────────────────────────────────────

fn fast_config() -> ProtocolConfig {
    ProtocolConfig {
        poll_interval: Duration::from_millis(10),
        submit_timeout: Duration::from_millis(150),
        peek_limit: 64,
        max_deliveries: 3,
        visibility_timeout: Duration::from_secs(30),
        idle_backoff: Duration::from_millis(5),
        status_base_url: String::new(),
    }
}

struct Harness {
    queue: Arc<MemoryQueue>,
    dead_letters: Arc<MemoryQueue>,
    results: Arc<MemoryStore>,
    config: ProtocolConfig,
}

impl Harness {
    fn new(config: ProtocolConfig) -> Self {
        Self {
            queue: Arc::new(MemoryQueue::new()),
            dead_letters: Arc::new(MemoryQueue::new()),
            results: Arc::new(MemoryStore::new()),
            config,
        }
    }

    fn submitter(&self) -> TaskSubmitter {
        TaskSubmitter::new(self.queue.clone(), self.results.clone(), self.config.clone())
    }

    fn status(&self) -> TaskStatusService {
        TaskStatusService::new(self.queue.clone(), self.results.clone(), self.config.peek_limit)
    }

    fn worker(&self, processor: Arc<dyn TaskProcessor>, callback: Arc<dyn CallbackNotifier>) -> Worker {
        Worker::new(
            self.queue.clone(),
            self.dead_letters.clone(),
            self.results.clone(),
            processor,
            callback,
            self.config.clone(),
        )
    }

    /// Worker that writes results to `results` instead of the harness table.
    fn worker_with_results(&self, results: Arc<dyn KeyedStore>, processor: Arc<dyn TaskProcessor>) -> Worker {
        Worker::new(
            self.queue.clone(),
            self.dead_letters.clone(),
            results,
            processor,
            Arc::new(RecordingCallback::default()),
            self.config.clone(),
        )
    }

    fn quick_worker(&self) -> Worker {
        self.worker(
            Arc::new(SimulatedProcessor::new(Duration::ZERO, Duration::from_millis(5))),
            Arc::new(RecordingCallback::default()),
        )
    }

    async fn state_of(&self, task_type: TaskType, task_id: &str) -> Option<TaskState> {
        self.status()
            .status(task_type, task_id)
            .await
            .unwrap()
            .map(|report| report.state)
    }

    async fn receive(&self) -> ReceivedMessage {
        self.queue
            .receive(self.config.visibility_timeout)
            .await
            .unwrap()
            .expect("a message should be waiting")
    }
}

/// State of the DEBUG result row for `task_id`, read straight from `store`.
async fn stored_state(store: &MemoryStore, task_id: &str) -> TaskState {
    let entity = store
        .get(&TaskResult::partition_key(TaskType::Debug), task_id)
        .await
        .unwrap()
        .expect("a result row should exist");
    TaskResult::from_entity(TaskType::Debug, &entity).state()
}

fn draft(payload: &str) -> TaskDraft {
    TaskDraft {
        task_type: TaskType::Debug,
        payload: payload.to_owned(),
        callback_url: None,
    }
}

fn accepted_id(outcome: SubmitOutcome) -> String {
    match outcome {
        SubmitOutcome::Accepted { task_id, .. } => task_id,
        other => panic!("expected a deferred accept, got {other:?}"),
    }
}

// ── Submission ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn submit_without_worker_defers_with_status_url() {
    let harness = Harness::new(fast_config());
    let outcome = harness
        .submitter()
        .submit(draft("x"), &CancellationToken::new())
        .await
        .unwrap();

    match outcome {
        SubmitOutcome::Accepted {
            task_id,
            task_type,
            status_url,
        } => {
            assert_eq!(task_type, TaskType::Debug);
            assert_eq!(status_url, format!("/v1/tasks/get/DEBUG/{task_id}"));
            assert_eq!(harness.state_of(TaskType::Debug, &task_id).await, Some(TaskState::Queued));
        }
        other => panic!("expected a deferred accept, got {other:?}"),
    }
    assert_eq!(harness.queue.len(), 1);
}

#[tokio::test]
async fn submit_returns_result_when_worker_finishes_in_time() {
    let harness = Harness::new(ProtocolConfig {
        submit_timeout: Duration::from_secs(5),
        ..fast_config()
    });
    let worker = Arc::new(harness.quick_worker());
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn({
        let worker = worker.clone();
        let shutdown = shutdown.clone();
        async move { worker.run(shutdown).await }
    });

    let outcome = harness
        .submitter()
        .submit(draft("hello"), &CancellationToken::new())
        .await
        .unwrap();

    shutdown.cancel();
    handle.await.unwrap();

    match outcome {
        SubmitOutcome::Completed { task_id, result } => {
            assert_eq!(result.task_id, task_id);
            let output = result.decoded_output().unwrap();
            assert_eq!(output["payload"], "hello");
            assert_eq!(output["taskId"], task_id.as_str());
        }
        other => panic!("expected a synchronous result, got {other:?}"),
    }
    assert!(harness.queue.is_empty());
}

#[tokio::test]
async fn submitted_ids_are_unique() {
    let harness = Harness::new(ProtocolConfig {
        submit_timeout: Duration::ZERO,
        ..fast_config()
    });
    let submitter = harness.submitter();
    let mut ids = std::collections::HashSet::new();
    for _ in 0..20 {
        let outcome = submitter.submit(draft("x"), &CancellationToken::new()).await.unwrap();
        assert!(ids.insert(outcome.task_id().to_owned()));
    }
}

#[tokio::test]
async fn enqueue_failure_is_fatal() {
    let submitter = TaskSubmitter::new(Arc::new(DownQueue), Arc::new(MemoryStore::new()), fast_config());
    let err = submitter
        .submit(draft("x"), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SubmitError::Enqueue(StoreError::Unavailable(_))));
}

#[tokio::test]
async fn invalid_callback_is_rejected_before_enqueue() {
    let harness = Harness::new(fast_config());
    let err = harness
        .submitter()
        .submit(
            TaskDraft {
                callback_url: Some("mailto:ops@example.com".into()),
                ..draft("x")
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SubmitError::InvalidRequest(_)));
    assert!(harness.queue.is_empty());
}

#[tokio::test]
async fn poll_read_failures_do_not_abort_the_wait() {
    let queue = Arc::new(MemoryQueue::new());
    let results = Arc::new(FlakyStore {
        read_failures: AtomicUsize::new(3),
        ..Default::default()
    });
    let submitter = TaskSubmitter::new(queue.clone(), results.clone(), fast_config());

    let outcome = submitter
        .submit(draft("x"), &CancellationToken::new())
        .await
        .expect("read failures must not fail the submission");
    assert!(matches!(outcome, SubmitOutcome::Accepted { .. }));
    assert_eq!(results.read_failures.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cancelled_wait_downgrades_to_accepted() {
    let harness = Harness::new(ProtocolConfig {
        submit_timeout: Duration::from_secs(60),
        ..fast_config()
    });
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = tokio::time::timeout(Duration::from_secs(5), harness.submitter().submit(draft("x"), &cancel))
        .await
        .expect("a cancelled wait must return promptly")
        .unwrap();
    assert!(matches!(outcome, SubmitOutcome::Accepted { .. }));
}

// ── Status ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn unknown_task_is_not_found() {
    let harness = Harness::new(fast_config());
    assert_eq!(harness.state_of(TaskType::Debug, "never-submitted").await, None);
}

#[tokio::test]
async fn status_moves_from_queued_through_processing_to_processed() {
    let harness = Harness::new(ProtocolConfig {
        submit_timeout: Duration::ZERO,
        ..fast_config()
    });
    let task_id = accepted_id(
        harness
            .submitter()
            .submit(draft("x"), &CancellationToken::new())
            .await
            .unwrap(),
    );
    assert_eq!(harness.state_of(TaskType::Debug, &task_id).await, Some(TaskState::Queued));

    let gate = Arc::new(GateProcessor::default());
    let worker = Arc::new(harness.worker(gate.clone(), Arc::new(RecordingCallback::default())));
    let received = harness.receive().await;
    let pass = tokio::spawn({
        let worker = worker.clone();
        async move { worker.dispatch(received, &CancellationToken::new()).await }
    });

    gate.started.notified().await;
    assert_eq!(harness.state_of(TaskType::Debug, &task_id).await, Some(TaskState::Processing));

    gate.release.notify_one();
    pass.await.unwrap();
    assert_eq!(harness.state_of(TaskType::Debug, &task_id).await, Some(TaskState::Processed));
    assert!(harness.queue.is_empty());
}

#[tokio::test]
async fn peek_limit_bounds_the_queued_lookup() {
    let harness = Harness::new(ProtocolConfig {
        submit_timeout: Duration::ZERO,
        peek_limit: 2,
        ..fast_config()
    });
    let submitter = harness.submitter();
    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(accepted_id(
            submitter.submit(draft("x"), &CancellationToken::new()).await.unwrap(),
        ));
    }

    assert_eq!(harness.state_of(TaskType::Debug, &ids[0]).await, Some(TaskState::Queued));
    assert_eq!(harness.state_of(TaskType::Debug, &ids[1]).await, Some(TaskState::Queued));
    assert_eq!(harness.state_of(TaskType::Debug, &ids[2]).await, None);
}

#[tokio::test]
async fn queued_lookup_respects_task_type() {
    let harness = Harness::new(ProtocolConfig {
        submit_timeout: Duration::ZERO,
        ..fast_config()
    });
    let task_id = accepted_id(
        harness
            .submitter()
            .submit(draft("x"), &CancellationToken::new())
            .await
            .unwrap(),
    );

    assert_eq!(harness.state_of(TaskType::Debug, &task_id).await, Some(TaskState::Queued));
    assert_eq!(harness.state_of(TaskType::Compute, &task_id).await, None);

    harness.quick_worker().dispatch(harness.receive().await, &CancellationToken::new()).await;
    assert_eq!(harness.state_of(TaskType::Debug, &task_id).await, Some(TaskState::Processed));
    assert_eq!(harness.state_of(TaskType::Compute, &task_id).await, None);
}

// ── Worker ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn redelivery_converges_to_the_same_result() {
    let harness = Harness::new(fast_config());
    let request = TaskRequest::new(TaskType::Compute, "payload", None);
    let body = request.to_message_body().unwrap();
    harness.queue.enqueue(body.clone()).await.unwrap();
    harness.queue.enqueue(body).await.unwrap();

    let worker = harness.quick_worker();
    let cancel = CancellationToken::new();

    let first = harness.receive().await;
    assert_eq!(worker.handle(&first, &cancel).await.unwrap(), Disposition::Completed);
    let stored = harness.status().result(TaskType::Compute, &request.task_id).await.unwrap().unwrap();

    let second = harness.receive().await;
    assert_eq!(worker.handle(&second, &cancel).await.unwrap(), Disposition::AlreadyProcessed);
    let again = harness.status().result(TaskType::Compute, &request.task_id).await.unwrap().unwrap();
    assert_eq!(again.output, stored.output);
}

#[tokio::test]
async fn reprocessing_the_same_request_writes_identical_output() {
    let harness = Harness::new(fast_config());
    let request = TaskRequest::new(TaskType::Debug, "p", None);
    let processor = SimulatedProcessor::new(Duration::ZERO, Duration::from_millis(3));
    let cancel = CancellationToken::new();

    let a = processor.process(&request, &cancel).await.unwrap();
    let b = processor.process(&request, &cancel).await.unwrap();
    harness
        .results
        .upsert(TaskResult::completed(request.task_type, &request.task_id, a.clone()).to_entity())
        .await
        .unwrap();
    harness
        .results
        .upsert(TaskResult::completed(request.task_type, &request.task_id, b).to_entity())
        .await
        .unwrap();

    let stored = harness.status().result(TaskType::Debug, &request.task_id).await.unwrap().unwrap();
    assert_eq!(stored.output.as_deref(), Some(a.as_str()));
}

#[tokio::test]
async fn undecodable_message_is_dead_lettered() {
    let harness = Harness::new(fast_config());
    harness.queue.enqueue("{not json".into()).await.unwrap();

    let worker = harness.quick_worker();
    worker.dispatch(harness.receive().await, &CancellationToken::new()).await;

    assert!(harness.queue.is_empty());
    let letters = harness.dead_letters.peek(10).await.unwrap();
    assert_eq!(letters.len(), 1);
    let letter: DeadLetter = serde_json::from_str(&letters[0].body).unwrap();
    assert_eq!(letter.body, "{not json");
    assert!(letter.reason.starts_with("undecodable task message"));
}

#[tokio::test]
async fn exhausted_redeliveries_fail_the_task() {
    let harness = Harness::new(ProtocolConfig {
        max_deliveries: 2,
        ..fast_config()
    });
    let request = TaskRequest::new(TaskType::Debug, "x", None);
    harness.queue.enqueue(request.to_message_body().unwrap()).await.unwrap();

    let worker = harness.worker(Arc::new(FailingProcessor), Arc::new(RecordingCallback::default()));
    let cancel = CancellationToken::new();

    for attempt in 1..=2 {
        let received = harness.receive().await;
        assert_eq!(received.message.dequeue_count, attempt);
        assert!(worker.handle(&received, &cancel).await.is_err());
        assert_eq!(
            harness.state_of(TaskType::Debug, &request.task_id).await,
            Some(TaskState::Processing)
        );
        harness.queue.release(&received.receipt).await.unwrap();
    }

    worker.dispatch(harness.receive().await, &cancel).await;
    assert_eq!(harness.state_of(TaskType::Debug, &request.task_id).await, Some(TaskState::Failed));
    assert!(harness.queue.is_empty());
    assert_eq!(harness.dead_letters.len(), 1);
}

#[tokio::test]
async fn failed_pass_leaves_message_for_redelivery() {
    let harness = Harness::new(fast_config());
    let request = TaskRequest::new(TaskType::Debug, "x", None);
    harness.queue.enqueue(request.to_message_body().unwrap()).await.unwrap();

    let worker = harness.worker(Arc::new(FailingProcessor), Arc::new(RecordingCallback::default()));
    worker.dispatch(harness.receive().await, &CancellationToken::new()).await;

    // Still owned by the failed delivery until its visibility timeout expires.
    assert_eq!(harness.queue.len(), 1);
    assert!(harness.queue.peek(10).await.unwrap().is_empty());
}

#[tokio::test]
#[traced_test]
async fn placeholder_write_failure_does_not_fail_the_pass() {
    let harness = Harness::new(fast_config());
    let request = TaskRequest::new(TaskType::Debug, "x", None);
    harness.queue.enqueue(request.to_message_body().unwrap()).await.unwrap();

    let results = Arc::new(FlakyStore {
        fail_inserts: AtomicBool::new(true),
        ..Default::default()
    });
    let worker = harness.worker_with_results(
        results.clone(),
        Arc::new(SimulatedProcessor::new(Duration::ZERO, Duration::ZERO)),
    );
    let received = harness.receive().await;
    assert_eq!(
        worker.handle(&received, &CancellationToken::new()).await.unwrap(),
        Disposition::Completed
    );
    assert!(logs_contain("failed to write processing placeholder"));

    assert_eq!(stored_state(&results.inner, &request.task_id).await, TaskState::Processed);
}

#[tokio::test]
async fn result_write_failure_leaves_message_for_redelivery() {
    let harness = Harness::new(fast_config());
    let request = TaskRequest::new(TaskType::Debug, "x", None);
    harness.queue.enqueue(request.to_message_body().unwrap()).await.unwrap();

    let results = Arc::new(FlakyStore {
        fail_upserts: AtomicBool::new(true),
        ..Default::default()
    });
    let worker = harness.worker_with_results(
        results.clone(),
        Arc::new(SimulatedProcessor::new(Duration::ZERO, Duration::ZERO)),
    );
    let received = harness.receive().await;
    let err = worker.handle(&received, &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, WorkerError::Persist { ref task_id, .. } if *task_id == request.task_id));

    worker.dispatch(received, &CancellationToken::new()).await;
    assert_eq!(harness.queue.len(), 1);
    assert!(harness.queue.peek(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn concurrent_delivery_keeps_the_finished_result() {
    let harness = Harness::new(fast_config());
    let request = TaskRequest::new(TaskType::Debug, "x", None);
    harness.queue.enqueue(request.to_message_body().unwrap()).await.unwrap();

    let results = Arc::new(LaggingReadStore::default());
    let done = TaskResult::completed(TaskType::Debug, &request.task_id, r#"{"gated":true}"#.to_owned());
    results.inner.upsert(done.to_entity()).await.unwrap();

    let gate = Arc::new(GateProcessor::default());
    let worker = Arc::new(harness.worker_with_results(results.clone(), gate.clone()));
    let received = harness.receive().await;
    let pass = tokio::spawn({
        let worker = worker.clone();
        async move { worker.handle(&received, &CancellationToken::new()).await }
    });

    gate.started.notified().await;
    assert_eq!(stored_state(&results.inner, &request.task_id).await, TaskState::Processed);

    gate.release.notify_one();
    assert_eq!(pass.await.unwrap().unwrap(), Disposition::Completed);
    assert_eq!(stored_state(&results.inner, &request.task_id).await, TaskState::Processed);
}

#[tokio::test]
async fn shutdown_releases_in_flight_message() {
    let harness = Harness::new(fast_config());
    let request = TaskRequest::new(TaskType::Debug, "x", None);
    harness.queue.enqueue(request.to_message_body().unwrap()).await.unwrap();

    let gate = Arc::new(GateProcessor::default());
    let worker = Arc::new(harness.worker(gate.clone(), Arc::new(RecordingCallback::default())));
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn({
        let worker = worker.clone();
        let shutdown = shutdown.clone();
        async move { worker.run(shutdown).await }
    });

    gate.started.notified().await;
    shutdown.cancel();
    handle.await.unwrap();

    let visible = harness.queue.peek(10).await.unwrap();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].dequeue_count, 1);
}

#[tokio::test]
async fn callback_receives_decoded_result() {
    let harness = Harness::new(fast_config());
    let request = TaskRequest::new(TaskType::Debug, "x", Some("http://hooks.example/done".into()));
    harness.queue.enqueue(request.to_message_body().unwrap()).await.unwrap();

    let callback = Arc::new(RecordingCallback::default());
    let worker = harness.worker(
        Arc::new(SimulatedProcessor::new(Duration::ZERO, Duration::ZERO)),
        callback.clone(),
    );
    worker.dispatch(harness.receive().await, &CancellationToken::new()).await;

    let calls = callback.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "http://hooks.example/done");
    assert_eq!(calls[0].1.task_id, request.task_id);
    assert_eq!(calls[0].1.result["payload"], "x");
}

#[tokio::test]
#[traced_test]
async fn callback_failure_does_not_fail_the_task() {
    let harness = Harness::new(fast_config());
    let request = TaskRequest::new(TaskType::Debug, "x", Some("http://hooks.example/done".into()));
    harness.queue.enqueue(request.to_message_body().unwrap()).await.unwrap();

    let worker = harness.worker(
        Arc::new(SimulatedProcessor::new(Duration::ZERO, Duration::ZERO)),
        Arc::new(FailingCallback),
    );
    let received = harness.receive().await;
    assert_eq!(
        worker.handle(&received, &CancellationToken::new()).await.unwrap(),
        Disposition::Completed
    );
    assert_eq!(harness.state_of(TaskType::Debug, &request.task_id).await, Some(TaskState::Processed));
    assert!(logs_contain("callback failed"));
}
