/// Session Manager
///
/// Owns every MCP server session: connects them in parallel with bounded
/// retries, registers their tools, forwards tool calls and tears everything
/// down on shutdown.
use super::session::{Liveness, McpConnector, McpSession, SessionError, SessionHandle};
use super::types::{McpError, McpServerConfig, McpToolResult};
use crate::tools::{ToolDescriptor, ToolRegistry};
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Retry and timeout settings for server connects
#[derive(Debug, Clone, Copy)]
pub struct ConnectPolicy {
    /// Attempts per server before it is marked degraded
    pub attempts: u32,
    /// Delay before the second attempt, doubled after each failure
    pub backoff: Duration,
    /// Bound on one attempt (spawn, handshake and tool listing)
    pub connect_timeout: Duration,
    /// Bound on closing one session
    pub close_timeout: Duration,
}

impl Default for ConnectPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(30),
            close_timeout: Duration::from_secs(5),
        }
    }
}

impl ConnectPolicy {
    fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.backoff.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

/// Connection result for one server
#[derive(Debug, Clone, Serialize)]
pub struct ServerOutcome {
    pub server_id: String,
    pub liveness: Liveness,
    pub attempts: u32,
    pub tools: Vec<String>,
    pub last_error: Option<String>,
}

impl ServerOutcome {
    fn new(server_id: &str) -> Self {
        Self {
            server_id: server_id.to_string(),
            liveness: Liveness::Connecting,
            attempts: 0,
            tools: Vec::new(),
            last_error: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.liveness == Liveness::Ready
    }
}

/// What happened during shutdown
#[derive(Debug, Default, Clone)]
pub struct ShutdownReport {
    pub closed: Vec<String>,
    /// (server, error) for every close that failed or timed out
    pub failures: Vec<(String, String)>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

enum AttemptError {
    /// Worth another attempt
    Retry(String),
    /// Give up on this server now
    Fatal(String),
}

/// Owns MCP server sessions and keeps the tool registry in sync with them
pub struct SessionManager {
    connector: Arc<dyn McpConnector>,
    registry: Arc<ToolRegistry>,
    policy: ConnectPolicy,
    /// Live sessions: server_id -> handle
    sessions: RwLock<HashMap<String, Arc<SessionHandle>>>,
    health: RwLock<HashMap<String, ServerOutcome>>,
    configs: RwLock<HashMap<String, McpServerConfig>>,
}

impl SessionManager {
    pub fn new(
        connector: Arc<dyn McpConnector>,
        registry: Arc<ToolRegistry>,
        policy: ConnectPolicy,
    ) -> Self {
        Self {
            connector,
            registry,
            policy,
            sessions: RwLock::new(HashMap::new()),
            health: RwLock::new(HashMap::new()),
            configs: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn policy(&self) -> ConnectPolicy {
        self.policy
    }

    /// Connect every server concurrently.
    ///
    /// One server failing never affects the others; it ends up degraded in
    /// the returned outcomes while the rest become ready. Outcomes follow
    /// the order of `configs`.
    pub async fn connect_all(
        &self,
        configs: Vec<McpServerConfig>,
        cancel: &CancellationToken,
    ) -> Vec<ServerOutcome> {
        info!(target: "session_manager", servers = configs.len(), "Connecting MCP servers");

        let mut seen = HashSet::new();
        let mut tasks = Vec::with_capacity(configs.len());
        let mut duplicates = HashMap::new();
        for (i, config) in configs.into_iter().enumerate() {
            if !seen.insert(config.name.clone()) {
                warn!(target: "session_manager", server = %config.name, "Duplicate server name in configuration");
                let mut outcome = ServerOutcome::new(&config.name);
                outcome.liveness = Liveness::Degraded;
                outcome.last_error = Some(format!("duplicate server name: {}", config.name));
                duplicates.insert(i, outcome);
                continue;
            }
            tasks.push(self.connect_one(config, cancel));
        }

        let mut connected = join_all(tasks).await.into_iter();
        let total = connected.len() + duplicates.len();
        let outcomes: Vec<ServerOutcome> = (0..total)
            .filter_map(|i| duplicates.remove(&i).or_else(|| connected.next()))
            .collect();

        let ready = outcomes.iter().filter(|o| o.is_ready()).count();
        info!(
            target: "session_manager",
            ready,
            degraded = outcomes.len() - ready,
            tools = self.registry.len(),
            "MCP server startup complete"
        );
        outcomes
    }

    /// Tear down any existing session for `server_id` and connect it again
    /// using its stored config
    pub async fn reconnect(
        &self,
        server_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ServerOutcome, SessionError> {
        let config = self
            .configs
            .read()
            .await
            .get(server_id)
            .cloned()
            .ok_or_else(|| SessionError::Unknown(server_id.to_string()))?;

        info!(target: "session_manager", server = %server_id, "Reconnecting MCP server");
        if let Some(handle) = self.sessions.write().await.remove(server_id) {
            self.release(&handle, Liveness::Closed).await;
        }

        let outcome = self.connect_one(config, cancel).await;
        if outcome.is_ready() {
            Ok(outcome)
        } else {
            Err(SessionError::ConnectFailed {
                server: server_id.to_string(),
                attempts: outcome.attempts,
                reason: outcome.last_error.unwrap_or_default(),
            })
        }
    }

    async fn connect_one(&self, config: McpServerConfig, cancel: &CancellationToken) -> ServerOutcome {
        let server_id = config.name.clone();
        self.configs
            .write()
            .await
            .insert(server_id.clone(), config.clone());

        let mut outcome = ServerOutcome::new(&server_id);
        self.health
            .write()
            .await
            .insert(server_id.clone(), outcome.clone());

        let attempts = self.policy.attempts.max(1);
        for attempt in 1..=attempts {
            outcome.attempts = attempt;
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(AttemptError::Fatal("connect cancelled".to_string())),
                r = self.attempt(&config) => r,
            };

            match result {
                Ok(handle) => {
                    outcome.liveness = Liveness::Ready;
                    outcome.tools = handle.tools().to_vec();
                    outcome.last_error = None;
                    info!(
                        target: "session_manager",
                        server = %server_id,
                        attempt,
                        tools = outcome.tools.len(),
                        "MCP server ready"
                    );
                    break;
                }
                Err(AttemptError::Fatal(reason)) => {
                    error!(target: "session_manager", server = %server_id, error = %reason, "MCP server failed");
                    outcome.last_error = Some(reason);
                    break;
                }
                Err(AttemptError::Retry(reason)) => {
                    warn!(
                        target: "session_manager",
                        server = %server_id,
                        attempt,
                        max_attempts = attempts,
                        error = %reason,
                        "MCP server connect attempt failed"
                    );
                    outcome.last_error = Some(reason);
                    if attempt < attempts {
                        let delay = self.policy.delay_after(attempt);
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => {
                                outcome.last_error = Some("connect cancelled".to_string());
                                break;
                            }
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        }

        if !outcome.is_ready() {
            outcome.liveness = Liveness::Degraded;
        }
        self.health
            .write()
            .await
            .insert(server_id, outcome.clone());
        outcome
    }

    /// One connect attempt: open, list tools, register
    async fn attempt(&self, config: &McpServerConfig) -> Result<Arc<SessionHandle>, AttemptError> {
        let opened = timeout(self.policy.connect_timeout, async {
            let session = self.connector.connect(config).await?;
            match session.list_tools().await {
                Ok(tools) => Ok((session, tools)),
                Err(e) => {
                    if let Err(close_err) = session.close().await {
                        warn!(target: "session_manager", server = %config.name, error = %close_err, "Failed to close MCP session after tools/list failed");
                    }
                    Err(e)
                }
            }
        })
        .await;

        let (session, tools) = match opened {
            Ok(Ok(pair)) => pair,
            Ok(Err(McpError::InvalidParams(reason))) => return Err(AttemptError::Fatal(reason)),
            Ok(Err(e)) => return Err(AttemptError::Retry(e.to_string())),
            Err(_) => {
                return Err(AttemptError::Retry(format!(
                    "connect timed out after {}ms",
                    self.policy.connect_timeout.as_millis()
                )))
            }
        };

        let descriptors: Vec<ToolDescriptor> = tools.into_iter().map(ToolDescriptor::from).collect();
        let names = descriptors.iter().map(|d| d.name.clone()).collect();
        let handle = Arc::new(SessionHandle::new(&config.name, session, names));

        // Registry entries only hold a weak reference, so the handle is
        // stored before it is published
        self.sessions
            .write()
            .await
            .insert(config.name.clone(), Arc::clone(&handle));

        if let Err(e) = self.registry.register(&config.name, descriptors, &handle) {
            self.sessions.write().await.remove(&config.name);
            self.release(&handle, Liveness::Degraded).await;
            return Err(AttemptError::Fatal(SessionError::Registration(e).to_string()));
        }

        handle.set_liveness(Liveness::Ready).await;
        Ok(handle)
    }

    /// Forward a tool call to a ready session
    pub async fn dispatch(
        &self,
        handle: &Arc<SessionHandle>,
        tool: &str,
        arguments: Value,
    ) -> Result<McpToolResult, SessionError> {
        if !handle.is_ready().await {
            return Err(SessionError::Closed(handle.server_id().to_string()));
        }

        debug!(target: "session_manager", server = %handle.server_id(), tool = %tool, "Dispatching tool call");
        match handle.session().call_tool(tool, arguments).await {
            Ok(result) => Ok(result),
            Err(e) => {
                if e.is_fatal() {
                    self.mark_degraded(handle, &e.to_string()).await;
                }
                Err(SessionError::Call {
                    server: handle.server_id().to_string(),
                    source: e,
                })
            }
        }
    }

    /// Take a session out of service after a transport failure
    async fn mark_degraded(&self, handle: &Arc<SessionHandle>, reason: &str) {
        let server_id = handle.server_id();
        warn!(target: "session_manager", server = %server_id, error = %reason, "MCP session degraded");

        {
            let mut sessions = self.sessions.write().await;
            if sessions
                .get(server_id)
                .is_some_and(|h| Arc::ptr_eq(h, handle))
            {
                sessions.remove(server_id);
            }
        }
        self.release(handle, Liveness::Degraded).await;

        if let Some(health) = self.health.write().await.get_mut(server_id) {
            health.liveness = Liveness::Degraded;
            health.last_error = Some(reason.to_string());
        }
    }

    /// Unregister and close one session, leaving it in `final_state`
    async fn release(&self, handle: &Arc<SessionHandle>, final_state: Liveness) -> Option<String> {
        handle.set_liveness(final_state).await;
        self.registry.unregister_all(handle.server_id());
        match timeout(self.policy.close_timeout, handle.session().close()).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!(
                "close timed out after {}ms",
                self.policy.close_timeout.as_millis()
            )),
        }
    }

    /// Close every session. Failures are logged and reported, never raised.
    pub async fn shutdown(&self) -> ShutdownReport {
        let handles: Vec<_> = self.sessions.write().await.drain().collect();
        info!(target: "session_manager", sessions = handles.len(), "Shutting down MCP sessions");

        let results = join_all(handles.into_iter().map(|(server_id, handle)| async move {
            let failure = self.release(&handle, Liveness::Closed).await;
            (server_id, failure)
        }))
        .await;

        let mut report = ShutdownReport::default();
        let mut health = self.health.write().await;
        for (server_id, failure) in results {
            if let Some(h) = health.get_mut(&server_id) {
                h.liveness = Liveness::Closed;
            }
            match failure {
                Some(e) => {
                    warn!(target: "session_manager", server = %server_id, error = %e, "Failed to close MCP session");
                    report.failures.push((server_id, e));
                }
                None => {
                    debug!(target: "session_manager", server = %server_id, "MCP session closed");
                    report.closed.push(server_id);
                }
            }
        }
        report.closed.sort();
        report.failures.sort();

        info!(
            target: "session_manager",
            closed = report.closed.len(),
            failed = report.failures.len(),
            "MCP shutdown complete"
        );
        report
    }

    /// Live handle for a server, if it has one
    pub async fn session(&self, server_id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.read().await.get(server_id).cloned()
    }

    /// Health of every configured server, sorted by id
    pub async fn server_health(&self) -> Vec<ServerOutcome> {
        let mut health: Vec<_> = self.health.read().await.values().cloned().collect();
        health.sort_by(|a, b| a.server_id.cmp(&b.server_id));
        health
    }

    /// Configured server ids, sorted
    pub async fn list_servers(&self) -> Vec<String> {
        let mut names: Vec<_> = self.configs.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn ready_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
