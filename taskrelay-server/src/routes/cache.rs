//! Key/value cache endpoints addressed as `/cache/{partition}:{key}`.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use serde_json::Value;
use taskrelay_core::cache::CacheKey;
use utoipa::OpenApi;

use crate::error::ServerError;
use crate::schemas::cache::CacheWriteResponse;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(get_cache_entry, put_cache_entry), components(schemas(CacheWriteResponse)))]
pub struct CacheApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/cache/{entry}", get(get_cache_entry).post(put_cache_entry))
}

#[utoipa::path(
    get,
    path = "/cache/{entry}",
    tag = "cache",
    params(("entry" = String, Path, description = "`partition:key`")),
    responses(
        (status = 200, description = "Stored JSON", body = Value),
        (status = 400, description = "Malformed cache key"),
        (status = 404, description = "Missing or stale entry"),
    )
)]
pub async fn get_cache_entry(
    State(state): State<Arc<AppState>>,
    Path(entry): Path<String>,
) -> Result<Json<Value>, ServerError> {
    let key: CacheKey = entry.parse()?;
    let cached = state
        .cache
        .get(&key)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("no fresh cache entry for {key}")))?;
    Ok(Json(cached.json))
}

/// Replace the entry with the raw JSON request body.
#[utoipa::path(
    post,
    path = "/cache/{entry}",
    tag = "cache",
    params(("entry" = String, Path, description = "`partition:key`")),
    request_body(content = Value, content_type = "application/json"),
    responses(
        (status = 200, description = "Entry written", body = CacheWriteResponse),
        (status = 400, description = "Malformed key or body"),
    )
)]
pub async fn put_cache_entry(
    State(state): State<Arc<AppState>>,
    Path(entry): Path<String>,
    body: Bytes,
) -> Result<Json<CacheWriteResponse>, ServerError> {
    let key: CacheKey = entry.parse()?;
    let json: Value = serde_json::from_slice(&body)
        .map_err(|e| ServerError::BadRequest(format!("body must be valid JSON: {e}")))?;
    let written = state.cache.put(&key, json).await?;
    Ok(Json(written.into()))
}
