// Session counters and logging setup
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Default log filter when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "warn,tiny_agents_core=info,tiny_agent=info";

/// Counters for one agent session
#[derive(Debug)]
pub struct SessionState {
    messages: AtomicU64,
    tool_calls: AtomicU64,
    tool_errors: AtomicU64,
    model_calls: AtomicU64,
    queries: AtomicU64,
    started_at: DateTime<Utc>,
}

/// Point-in-time copy of [`SessionState`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub messages: u64,
    pub tool_calls: u64,
    pub tool_errors: u64,
    pub model_calls: u64,
    pub queries: u64,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            messages: AtomicU64::new(0),
            tool_calls: AtomicU64::new(0),
            tool_errors: AtomicU64::new(0),
            model_calls: AtomicU64::new(0),
            queries: AtomicU64::new(0),
            started_at: Utc::now(),
        }
    }

    pub fn record_messages(&self, n: u64) {
        self.messages.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_tool_call(&self, failed: bool) {
        self.tool_calls.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.tool_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_model_call(&self) {
        self.model_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_query(&self) {
        self.queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            messages: self.messages.load(Ordering::Relaxed),
            tool_calls: self.tool_calls.load(Ordering::Relaxed),
            tool_errors: self.tool_errors.load(Ordering::Relaxed),
            model_calls: self.model_calls.load(Ordering::Relaxed),
            queries: self.queries.load(Ordering::Relaxed),
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds(),
        }
    }
}

/// Install a stderr `fmt` subscriber filtered by `RUST_LOG`, falling back to
/// `default_filter`. Fails if a global subscriber is already set.
pub fn init_tracing(default_filter: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init()?;

    info!(target: "telemetry", "Tracing initialized");
    Ok(())
}
