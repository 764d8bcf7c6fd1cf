use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::types::TaskType;

#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("callback request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("callback endpoint answered HTTP {status}")]
    Status { status: u16 },
}

/// Body POSTed to a task's `callbackUrl` once it is processed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackBody {
    pub task_id: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub result: Value,
}

/// Delivers completion notifications. Delivery is best-effort: the worker
/// logs failures and moves on.
#[async_trait]
pub trait CallbackNotifier: Send + Sync + 'static {
    async fn notify(&self, url: &str, body: &CallbackBody) -> Result<(), CallbackError>;
}

/// [`CallbackNotifier`] over a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpCallback {
    client: reqwest::Client,
}

impl HttpCallback {
    pub fn new(timeout: Duration) -> Result<Self, CallbackError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl CallbackNotifier for HttpCallback {
    async fn notify(&self, url: &str, body: &CallbackBody) -> Result<(), CallbackError> {
        let response = self.client.post(url).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CallbackError::Status {
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}
