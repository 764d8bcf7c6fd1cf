//! Asynchronous task relay: submit a task, let a worker pick it up from a
//! queue, and read the result back from a keyed table.
//!
//! The crate is split into three layers:
//!
//! - [`types`]: the data model shared by every component.
//! - [`storage`]: the [`TaskQueue`] and [`KeyedStore`] capabilities, with
//!   in-memory and SQLite implementations.
//! - [`protocol`]: the submission, status and worker services built on top of
//!   those capabilities.
//!
//! [`cache`] is a small freshness-windowed key/value layer over the same
//! [`KeyedStore`].

pub mod cache;
pub mod error;
pub mod protocol;
pub mod storage;
pub mod types;

pub use error::StoreError;
pub use storage::{KeyedStore, TaskQueue};
pub use types::{TaskRequest, TaskResult, TaskState, TaskType};
