//! Background worker pool draining the task queue.

use std::sync::Arc;

use taskrelay_core::protocol::worker::Worker;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info_span};

/// Spawn `count` receive loops sharing one [`Worker`]. Each loop stops when
/// `shutdown` is cancelled; join the returned handles to wait for in-flight
/// messages to be settled.
pub fn spawn_pool(worker: Arc<Worker>, count: usize, shutdown: &CancellationToken) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|id| {
            let worker = Arc::clone(&worker);
            let token = shutdown.child_token();
            tokio::spawn(async move { worker.run(token).await }.instrument(info_span!("worker", id)))
        })
        .collect()
}
