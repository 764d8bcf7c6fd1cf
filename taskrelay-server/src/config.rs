//! Server configuration, loaded from environment variables at startup.

use std::time::Duration;

use taskrelay_core::protocol::ProtocolConfig;

/// `TASKRELAY_DATABASE_URL` value that selects the in-memory backends.
pub const MEMORY_DATABASE_URL: &str = "memory://";

/// Runtime configuration for taskrelay-server.
///
/// Every field has a sensible default so the server works out-of-the-box
/// without any environment variables set.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default: `"0.0.0.0:3000"`).
    pub bind_address: String,

    /// SQLite URL (default: `"sqlite://taskrelay.db"`). `memory://` keeps
    /// everything in process, which is handy for demos and tests.
    pub database_url: String,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    pub submit_timeout: Duration,
    pub poll_interval: Duration,
    pub peek_limit: usize,
    pub max_deliveries: u32,
    pub visibility_timeout: Duration,
    pub idle_backoff: Duration,

    /// Number of worker loops draining the task queue.
    pub workers: usize,

    /// Bounds of the simulated processing delay.
    pub work_delay_min: Duration,
    pub work_delay_max: Duration,

    pub callback_timeout: Duration,

    /// Prefix for status URLs in 202 responses; empty yields relative URLs.
    pub status_base_url: String,

    /// How long a cache entry stays readable after its last write.
    pub cache_freshness: Duration,

    /// Comma-separated list of allowed CORS origins. `None` allows any.
    pub cors_allowed_origins: Option<String>,

    /// Serve Swagger UI and the OpenAPI document.
    pub enable_swagger: bool,
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build [`Config`] from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let env = Env(lookup);
        Self {
            bind_address: env.or("TASKRELAY_BIND", "0.0.0.0:3000"),
            database_url: env.or("TASKRELAY_DATABASE_URL", "sqlite://taskrelay.db"),
            log_level: env.or("TASKRELAY_LOG", "info"),
            log_json: env.flag("TASKRELAY_LOG_JSON", false),
            submit_timeout: Duration::from_millis(env.parse("TASKRELAY_SUBMIT_TIMEOUT_MS", 3_000)),
            // Zero would spin the submit wait or hide every queued task.
            poll_interval: Duration::from_millis(env.parse("TASKRELAY_POLL_INTERVAL_MS", 500).max(1)),
            peek_limit: env.parse("TASKRELAY_PEEK_LIMIT", 64).max(1),
            max_deliveries: env.parse("TASKRELAY_MAX_DELIVERIES", 5),
            visibility_timeout: Duration::from_secs(env.parse("TASKRELAY_VISIBILITY_TIMEOUT_SECS", 30)),
            idle_backoff: Duration::from_millis(env.parse("TASKRELAY_IDLE_BACKOFF_MS", 1_000)),
            workers: env.parse("TASKRELAY_WORKERS", 2),
            work_delay_min: Duration::from_millis(env.parse("TASKRELAY_WORK_DELAY_MIN_MS", 500)),
            work_delay_max: Duration::from_millis(env.parse("TASKRELAY_WORK_DELAY_MAX_MS", 5_000)),
            callback_timeout: Duration::from_secs(env.parse("TASKRELAY_CALLBACK_TIMEOUT_SECS", 10)),
            status_base_url: env.or("TASKRELAY_STATUS_BASE_URL", ""),
            cache_freshness: Duration::from_secs(env.parse("TASKRELAY_CACHE_FRESHNESS_SECS", 300)),
            cors_allowed_origins: env.get("TASKRELAY_CORS_ORIGINS").filter(|v| !v.trim().is_empty()),
            enable_swagger: env.flag("TASKRELAY_ENABLE_SWAGGER", true),
        }
    }

    pub fn uses_memory_backend(&self) -> bool {
        self.database_url == MEMORY_DATABASE_URL
    }

    /// The subset of settings the protocol services need.
    pub fn protocol(&self) -> ProtocolConfig {
        ProtocolConfig {
            poll_interval: self.poll_interval,
            submit_timeout: self.submit_timeout,
            peek_limit: self.peek_limit,
            max_deliveries: self.max_deliveries,
            visibility_timeout: self.visibility_timeout,
            idle_backoff: self.idle_backoff,
            status_base_url: self.status_base_url.trim_end_matches('/').to_owned(),
        }
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_owned())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        self.get(key)
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(default)
    }
}
