use serde::{Deserialize, Serialize};
use serde_json::Value;
use taskrelay_core::protocol::status::TaskStatusReport;
use taskrelay_core::types::DeadLetter;
use utoipa::{IntoParams, ToSchema};

/// Body of `POST /v1/tasks/submit`. Any client-supplied `taskId` is ignored.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubmitTaskRequest {
    /// Opaque payload. Non-string JSON is accepted and passed on in its
    /// serialized form.
    #[serde(default)]
    #[schema(value_type = String, example = "hello")]
    pub payload: Value,
    #[serde(rename = "type")]
    #[schema(example = "DEBUG")]
    pub task_type: String,
    #[serde(default)]
    pub callback_url: Option<String>,
}

impl SubmitTaskRequest {
    pub fn payload_string(&self) -> String {
        match &self.payload {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// The task finished within the polling window.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubmitTaskResponse {
    pub task_id: String,
    #[schema(value_type = Object)]
    pub result: Value,
}

/// The task is still pending; poll `statusUrl`.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedTaskResponse {
    pub message: String,
    pub task_id: String,
    pub status_url: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusResponse {
    pub task_id: String,
    #[serde(rename = "type")]
    pub task_type: String,
    /// One of `queued`, `processing`, `processed`, `failed`.
    #[schema(example = "processed")]
    pub status: String,
}

impl From<TaskStatusReport> for TaskStatusResponse {
    fn from(report: TaskStatusReport) -> Self {
        Self {
            task_id: report.task_id,
            task_type: report.task_type.to_string(),
            status: report.state.to_string(),
        }
    }
}

#[derive(Debug, Deserialize, ToSchema, IntoParams)]
pub struct DeadLetterQuery {
    /// Maximum number of dead letters to return (default 20, capped at 100).
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterResponse {
    pub message_id: String,
    pub body: String,
    pub reason: String,
    pub dequeue_count: u32,
    pub dead_lettered_at: String,
}

impl From<DeadLetter> for DeadLetterResponse {
    fn from(letter: DeadLetter) -> Self {
        Self {
            message_id: letter.message_id,
            body: letter.body,
            reason: letter.reason,
            dequeue_count: letter.dequeue_count,
            dead_lettered_at: letter.dead_lettered_at.to_rfc3339(),
        }
    }
}
