//! taskrelay-server – entry point.
//!
//! Startup order:
//! 1. Parse configuration from environment variables.
//! 2. Initialise structured tracing (JSON in production, pretty in dev).
//! 3. Open the queue and table backends (SQLite or in-memory).
//! 4. Start the worker pool.
//! 5. Build the Axum router and start the HTTP server with graceful shutdown.
//! 6. Stop the workers and wait for in-flight messages to settle.

mod config;
mod error;
mod middleware;
mod routes;
mod schemas;
mod state;
mod workers;

use std::net::SocketAddr;
use std::sync::Arc;

use taskrelay_core::protocol::callback::HttpCallback;
use taskrelay_core::protocol::processor::SimulatedProcessor;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::state::{AppState, Backends};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Configuration ───────────────────────────────────────────────────────
    let cfg = Config::from_env();

    // ── 2. Tracing ─────────────────────────────────────────────────────────────
    init_tracing(&cfg);
    info!(version = env!("CARGO_PKG_VERSION"), "taskrelay-server starting");

    // ── 3. Storage ─────────────────────────────────────────────────────────────
    let backends = Backends::open(&cfg).await?;
    info!(database_url = %cfg.database_url, "storage ready");

    // ── 4. Worker pool ─────────────────────────────────────────────────────────
    let shutdown = CancellationToken::new();
    let worker = Arc::new(backends.worker(
        &cfg,
        Arc::new(SimulatedProcessor::new(cfg.work_delay_min, cfg.work_delay_max)),
        Arc::new(HttpCallback::new(cfg.callback_timeout)?),
    ));
    let worker_handles = workers::spawn_pool(worker, cfg.workers, &shutdown);
    info!(workers = cfg.workers, "worker pool started");

    // ── 5. HTTP server with graceful shutdown ──────────────────────────────────
    let addr: SocketAddr = cfg.bind_address.parse()?;
    let state = Arc::new(AppState::new(cfg, &backends, shutdown.clone()));
    let app = routes::build(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");

    let signal_token = shutdown.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Pending submissions stop waiting and answer 202.
            signal_token.cancel();
        })
        .await;

    // ── 6. Drain workers ───────────────────────────────────────────────────────
    shutdown.cancel();
    for joined in futures::future::join_all(worker_handles).await {
        if let Err(e) = joined {
            warn!(error = %e, "worker task ended abnormally");
        }
    }

    served?;
    info!("taskrelay-server stopped");
    Ok(())
}

fn init_tracing(cfg: &Config) {
    // Build the log-level filter, warning loudly if the configured value is
    // not a valid tracing filter expression.
    let env_filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => match cfg.log_level.parse::<tracing_subscriber::EnvFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!(
                    "WARN: TASKRELAY_LOG='{}' is not a valid tracing filter ({}); \
                     falling back to 'info'",
                    cfg.log_level, e
                );
                tracing_subscriber::EnvFilter::new("info")
            }
        },
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true);

    if cfg.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Returns a future that resolves when SIGINT (Ctrl-C) or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install CTRL+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received; starting graceful shutdown");
}
