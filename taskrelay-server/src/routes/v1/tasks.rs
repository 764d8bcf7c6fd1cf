//! Task submission and status endpoints.
//!
//! Submissions long-poll the result table for up to `submit_timeout`; a task
//! that finishes in time is answered with 200, anything slower with 202 and a
//! status URL.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde_json::Value;
use strum::IntoEnumIterator;
use taskrelay_core::TaskType;
use taskrelay_core::protocol::submit::{SubmitOutcome, TaskDraft};
use taskrelay_core::types::DeadLetter;
use tracing::warn;
use utoipa::OpenApi;

use crate::error::ServerError;
use crate::schemas::v1::task::{
    AcceptedTaskResponse, DeadLetterQuery, DeadLetterResponse, SubmitTaskRequest, SubmitTaskResponse,
    TaskStatusResponse,
};
use crate::state::AppState;

const DEFAULT_DEAD_LETTER_LIMIT: usize = 20;
const MAX_DEAD_LETTER_LIMIT: usize = 100;

#[derive(OpenApi)]
#[openapi(
    paths(submit_task, get_task_status, get_task_result, list_dead_letters),
    components(schemas(
        SubmitTaskRequest,
        SubmitTaskResponse,
        AcceptedTaskResponse,
        TaskStatusResponse,
        DeadLetterResponse,
        DeadLetterQuery
    ))
)]
pub struct TasksApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tasks/submit", post(submit_task))
        .route("/tasks/get/{task_type}/{task_id}", get(get_task_status))
        .route("/tasks/get/{task_type}/{task_id}/result", get(get_task_result))
        .route("/tasks/dead-letters", get(list_dead_letters))
}

fn parse_task_type(raw: &str) -> Result<TaskType, ServerError> {
    raw.parse().map_err(|_| {
        let known: Vec<String> = TaskType::iter().map(|t| t.to_string()).collect();
        ServerError::BadRequest(format!("unknown task type {raw:?}; expected one of {}", known.join(", ")))
    })
}

#[utoipa::path(
    post,
    path = "/v1/tasks/submit",
    tag = "tasks",
    request_body = SubmitTaskRequest,
    responses(
        (status = 200, description = "Task finished within the polling window", body = SubmitTaskResponse),
        (status = 202, description = "Task accepted; follow the Location header", body = AcceptedTaskResponse),
        (status = 400, description = "Empty or malformed request"),
        (status = 500, description = "The task could not be enqueued"),
    )
)]
pub async fn submit_task(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Response, ServerError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ServerError::BadRequest("request body is empty".into()));
    }
    let req: SubmitTaskRequest = serde_json::from_slice(&body)
        .map_err(|e| ServerError::BadRequest(format!("invalid task request: {e}")))?;

    let draft = TaskDraft {
        task_type: parse_task_type(&req.task_type)?,
        payload: req.payload_string(),
        callback_url: req.callback_url,
    };

    match state.submitter.submit(draft, &state.shutdown).await? {
        SubmitOutcome::Completed { task_id, result } => {
            let body = SubmitTaskResponse {
                task_id,
                result: result.decoded_output().unwrap_or_default(),
            };
            Ok((StatusCode::OK, Json(body)).into_response())
        }
        SubmitOutcome::Accepted {
            task_id, status_url, ..
        } => {
            let location = HeaderValue::from_str(&status_url)
                .map_err(|e| ServerError::Internal(format!("status url {status_url:?} is not a valid header: {e}")))?;
            let body = AcceptedTaskResponse {
                message: "Task accepted for processing".to_owned(),
                task_id,
                status_url,
            };
            Ok((StatusCode::ACCEPTED, [(header::LOCATION, location)], Json(body)).into_response())
        }
    }
}

#[utoipa::path(
    get,
    path = "/v1/tasks/get/{task_type}/{task_id}",
    tag = "tasks",
    params(
        ("task_type" = String, Path, description = "Task type, e.g. DEBUG"),
        ("task_id" = String, Path, description = "Id returned by submit")
    ),
    responses(
        (status = 200, description = "Task located", body = TaskStatusResponse),
        (status = 400, description = "Unknown task type"),
        (status = 404, description = "Task not found"),
    )
)]
pub async fn get_task_status(
    State(state): State<Arc<AppState>>,
    Path((task_type, task_id)): Path<(String, String)>,
) -> Result<Json<TaskStatusResponse>, ServerError> {
    let task_type = parse_task_type(&task_type)?;
    let report = state
        .status
        .status(task_type, &task_id)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("task {task_id} not found")))?;
    Ok(Json(report.into()))
}

#[utoipa::path(
    get,
    path = "/v1/tasks/get/{task_type}/{task_id}/result",
    tag = "tasks",
    params(
        ("task_type" = String, Path, description = "Task type, e.g. DEBUG"),
        ("task_id" = String, Path, description = "Id returned by submit")
    ),
    responses(
        (status = 200, description = "Decoded task output", body = Value),
        (status = 404, description = "Task not found"),
        (status = 409, description = "Task has not been processed"),
    )
)]
pub async fn get_task_result(
    State(state): State<Arc<AppState>>,
    Path((task_type, task_id)): Path<(String, String)>,
) -> Result<Json<Value>, ServerError> {
    let task_type = parse_task_type(&task_type)?;
    if let Some(result) = state.status.result(task_type, &task_id).await? {
        if result.is_processed() {
            return Ok(Json(result.decoded_output().unwrap_or_default()));
        }
        return Err(ServerError::Conflict(format!(
            "task {task_id} is not processed (status: {})",
            result.state()
        )));
    }

    match state.status.status(task_type, &task_id).await? {
        Some(report) => Err(ServerError::Conflict(format!(
            "task {task_id} is not processed (status: {})",
            report.state
        ))),
        None => Err(ServerError::NotFound(format!("task {task_id} not found"))),
    }
}

#[utoipa::path(
    get,
    path = "/v1/tasks/dead-letters",
    tag = "tasks",
    params(DeadLetterQuery),
    responses(
        (status = 200, description = "Oldest visible dead letters", body = [DeadLetterResponse]),
    )
)]
pub async fn list_dead_letters(
    State(state): State<Arc<AppState>>,
    Query(q): Query<DeadLetterQuery>,
) -> Result<Json<Vec<DeadLetterResponse>>, ServerError> {
    let limit = q
        .limit
        .unwrap_or(DEFAULT_DEAD_LETTER_LIMIT)
        .clamp(1, MAX_DEAD_LETTER_LIMIT);
    let messages = state.dead_letters.peek(limit).await?;

    let letters = messages
        .into_iter()
        .filter_map(|message| match serde_json::from_str::<DeadLetter>(&message.body) {
            Ok(letter) => Some(letter.into()),
            Err(e) => {
                warn!(message_id = %message.id, error = %e, "skipping malformed dead letter");
                None
            }
        })
        .collect();
    Ok(Json(letters))
}
