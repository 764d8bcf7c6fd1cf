//! Request and response bodies, annotated for the OpenAPI document.

pub mod cache;
pub mod v1;
