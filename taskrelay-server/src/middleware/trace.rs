use std::time::Instant;

use axum::body::{Body, Bytes};
use axum::extract::Request;
use axum::http::{HeaderMap, HeaderValue, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::error::ServerError;

pub static X_TRACE_ID: &str = "x-trace-id";

/// Bodies larger than this are summarised instead of logged.
const MAX_LOGGED_BODY: usize = 1024;

/// Largest request body the server buffers; anything bigger is answered
/// with 413 before a handler runs.
pub const MAX_REQUEST_BODY: usize = 2 * 1024 * 1024;

/// Assign (or propagate) an `x-trace-id`, run the request inside an
/// `http_request` span, and log small JSON bodies in both directions.
pub async fn trace_middleware(req: Request<Body>, next: Next) -> Response {
    let start_time = Instant::now();

    let trace_id = req
        .headers()
        .get(X_TRACE_ID)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::new_v4);
    let trace_header = HeaderValue::from_str(&trace_id.to_string()).ok();

    let span = info_span!(
        "http_request",
        trace_id = %trace_id,
        method = %req.method(),
        path = %req.uri().path(),
    );

    async move {
        debug!("request started");
        let (parts, body) = req.into_parts();
        let req_bytes = match Limited::new(body, MAX_REQUEST_BODY).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) if e.is::<LengthLimitError>() => {
                warn!(limit = MAX_REQUEST_BODY, "request body too large");
                let mut response =
                    ServerError::PayloadTooLarge(format!("request body exceeds {MAX_REQUEST_BODY} bytes")).into_response();
                if let Some(value) = trace_header {
                    response.headers_mut().insert(X_TRACE_ID, value);
                }
                return response;
            }
            Err(e) => {
                warn!(direction = "request", error = %e, "failed to buffer body");
                Bytes::new()
            }
        };
        log_body("request", &parts.headers, &req_bytes);
        let mut req = Request::from_parts(parts, Body::from(req_bytes));
        if let Some(value) = &trace_header {
            req.headers_mut().insert(X_TRACE_ID, value.clone());
        }

        let response = next.run(req).await;

        let (parts, body) = response.into_parts();
        let res_bytes = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                warn!(direction = "response", error = %e, "failed to buffer body");
                Bytes::new()
            }
        };
        log_body("response", &parts.headers, &res_bytes);
        let mut response = Response::from_parts(parts, Body::from(res_bytes));
        if let Some(value) = trace_header {
            response.headers_mut().insert(X_TRACE_ID, value);
        }

        info!(
            status = response.status().as_u16(),
            latency_ms = start_time.elapsed().as_millis(),
            "request finished"
        );
        response
    }
    .instrument(span)
    .await
}

fn log_body(direction: &str, headers: &HeaderMap, bytes: &Bytes) {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if content_type.contains("application/json") && bytes.len() < MAX_LOGGED_BODY {
        if let Ok(text) = std::str::from_utf8(bytes) {
            debug!(direction, body = text, "body");
        }
    } else if !bytes.is_empty() {
        debug!(direction, content_type, size = bytes.len(), "body skipped");
    }
}
