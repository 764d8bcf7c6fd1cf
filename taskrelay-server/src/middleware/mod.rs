//! HTTP middleware stack: CORS and per-request trace-ID injection.

pub mod cors;
pub mod trace;
