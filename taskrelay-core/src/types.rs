use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Property name holding the serialized task output in a result entity.
const OUTPUT_PROPERTY: &str = "Output";
/// Property name holding the failure reason in a result entity.
const ERROR_PROPERTY: &str = "Error";

/// Category of a submitted task.
///
/// Parsing is case-insensitive so `"debug"`, `"Debug"` and `"DEBUG"` all
/// resolve to [`TaskType::Debug`]; the canonical form is upper-case.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(try_from = "String", into = "String")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum TaskType {
    Debug,
    Compute,
}

impl TryFrom<String> for TaskType {
    type Error = strum::ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TaskType> for String {
    fn from(value: TaskType) -> Self {
        value.to_string()
    }
}

/// A unit of deferred work as it travels through the queue.
///
/// `task_id` is always assigned server-side; the value is immutable once the
/// request has been enqueued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequest {
    pub task_id: String,
    #[serde(default)]
    pub payload: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
}

impl TaskRequest {
    /// Build a request with a freshly generated task id.
    pub fn new(task_type: TaskType, payload: impl Into<String>, callback_url: Option<String>) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            payload: payload.into(),
            task_type,
            callback_url,
        }
    }

    pub fn to_message_body(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_message_body(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }
}

/// Client-facing lifecycle state of a task.
///
/// `Submitted → Queued → Processing → Processed`, with `Failed` as the
/// alternative terminal state once the redelivery limit is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TaskState {
    Queued,
    Processing,
    Processed,
    Failed,
}

/// A row of a partition+key addressed table.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub partition_key: String,
    pub row_key: String,
    pub timestamp: DateTime<Utc>,
    pub properties: Map<String, Value>,
}

impl Entity {
    pub fn new(partition_key: impl Into<String>, row_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            row_key: row_key.into(),
            timestamp: Utc::now(),
            properties: Map::new(),
        }
    }

    pub fn with_property(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(name.to_owned(), value.into());
        self
    }

    pub fn string_property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).and_then(Value::as_str)
    }
}

/// Result row for a single task, keyed by (`Results-{type}`, task id).
#[derive(Debug, Clone, PartialEq)]
pub struct TaskResult {
    pub task_type: TaskType,
    pub task_id: String,
    pub timestamp: DateTime<Utc>,
    /// Opaque JSON produced by the worker. `None` while the task is in flight.
    pub output: Option<String>,
    /// Failure reason; only set once the task is terminally failed.
    pub error: Option<String>,
}

impl TaskResult {
    pub fn partition_key(task_type: TaskType) -> String {
        format!("Results-{task_type}")
    }

    /// The "claimed" marker written when a worker picks a task up.
    pub fn placeholder(task_type: TaskType, task_id: impl Into<String>) -> Self {
        Self {
            task_type,
            task_id: task_id.into(),
            timestamp: Utc::now(),
            output: None,
            error: None,
        }
    }

    pub fn completed(task_type: TaskType, task_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            output: Some(output.into()),
            ..Self::placeholder(task_type, task_id)
        }
    }

    pub fn failed(task_type: TaskType, task_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            error: Some(reason.into()),
            ..Self::placeholder(task_type, task_id)
        }
    }

    /// Derive the lifecycle state from the stored columns.
    ///
    /// An empty output string counts as "no output yet".
    pub fn state(&self) -> TaskState {
        if self.error.is_some() {
            TaskState::Failed
        } else if self.is_processed() {
            TaskState::Processed
        } else {
            TaskState::Processing
        }
    }

    pub fn is_processed(&self) -> bool {
        self.error.is_none() && self.output.as_deref().is_some_and(|o| !o.is_empty())
    }

    /// Decode the output as JSON, falling back to a JSON string for outputs
    /// that are not valid JSON.
    pub fn decoded_output(&self) -> Option<Value> {
        self.output
            .as_ref()
            .filter(|o| !o.is_empty())
            .map(|o| serde_json::from_str(o).unwrap_or_else(|_| Value::String(o.clone())))
    }

    pub fn to_entity(&self) -> Entity {
        let mut entity = Entity::new(Self::partition_key(self.task_type), self.task_id.clone());
        entity.timestamp = self.timestamp;
        if let Some(output) = &self.output {
            entity = entity.with_property(OUTPUT_PROPERTY, output.clone());
        }
        if let Some(error) = &self.error {
            entity = entity.with_property(ERROR_PROPERTY, error.clone());
        }
        entity
    }

    pub fn from_entity(task_type: TaskType, entity: &Entity) -> Self {
        Self {
            task_type,
            task_id: entity.row_key.clone(),
            timestamp: entity.timestamp,
            output: entity.string_property(OUTPUT_PROPERTY).map(str::to_owned),
            error: entity.string_property(ERROR_PROPERTY).map(str::to_owned),
        }
    }
}

/// Envelope written to the dead-letter queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub message_id: String,
    pub body: String,
    pub reason: String,
    pub dequeue_count: u32,
    pub dead_lettered_at: DateTime<Utc>,
}
