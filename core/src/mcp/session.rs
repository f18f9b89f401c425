//! Session seam between the orchestrator and MCP servers.

use super::client::McpClient;
use super::types::{McpError, McpServerConfig, McpTool, McpToolResult};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// A live connection to one MCP server
#[async_trait]
pub trait McpSession: Send + Sync {
    /// Full tool catalog of the server
    async fn list_tools(&self) -> Result<Vec<McpTool>, McpError>;

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<McpToolResult, McpError>;

    /// Release the connection. Calling it twice is harmless.
    async fn close(&self) -> Result<(), McpError>;
}

/// Opens sessions from server configs
#[async_trait]
pub trait McpConnector: Send + Sync {
    async fn connect(&self, config: &McpServerConfig) -> Result<Arc<dyn McpSession>, McpError>;
}

/// Spawns each server as a child process and talks JSON-RPC over stdio
#[derive(Debug, Clone)]
pub struct StdioConnector {
    request_timeout: Duration,
}

impl StdioConnector {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

impl Default for StdioConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl McpConnector for StdioConnector {
    async fn connect(&self, config: &McpServerConfig) -> Result<Arc<dyn McpSession>, McpError> {
        config
            .validate_protocol_version()
            .map_err(McpError::InvalidParams)?;
        let client = McpClient::new(config.clone(), self.request_timeout);
        client.connect().await?;
        Ok(Arc::new(client))
    }
}

/// Session liveness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Liveness {
    Connecting,
    Ready,
    Degraded,
    Closed,
}

impl fmt::Display for Liveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Liveness::Connecting => "connecting",
            Liveness::Ready => "ready",
            Liveness::Degraded => "degraded",
            Liveness::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// A server session owned by the SessionManager
pub struct SessionHandle {
    server_id: String,
    session: Arc<dyn McpSession>,
    tools: Vec<String>,
    liveness: RwLock<Liveness>,
}

impl SessionHandle {
    pub fn new(server_id: impl Into<String>, session: Arc<dyn McpSession>, tools: Vec<String>) -> Self {
        Self {
            server_id: server_id.into(),
            session,
            tools,
            liveness: RwLock::new(Liveness::Connecting),
        }
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Names of the tools this session exposes
    pub fn tools(&self) -> &[String] {
        &self.tools
    }

    pub fn session(&self) -> &Arc<dyn McpSession> {
        &self.session
    }

    pub async fn liveness(&self) -> Liveness {
        *self.liveness.read().await
    }

    pub async fn set_liveness(&self, liveness: Liveness) {
        *self.liveness.write().await = liveness;
    }

    pub async fn is_ready(&self) -> bool {
        self.liveness().await == Liveness::Ready
    }
}

impl fmt::Debug for dyn McpSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("McpSession").finish_non_exhaustive()
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("server_id", &self.server_id)
            .field("tools", &self.tools)
            .finish_non_exhaustive()
    }
}

/// Session lifecycle errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Failed to connect to {server} after {attempts} attempts: {reason}")]
    ConnectFailed {
        server: String,
        attempts: u32,
        reason: String,
    },

    #[error("Session closed: {0}")]
    Closed(String),

    #[error("Unknown server: {0}")]
    Unknown(String),

    #[error("Registration failed: {0}")]
    Registration(#[from] crate::tools::ToolError),

    #[error("Call to {server} failed: {source}")]
    Call {
        server: String,
        #[source]
        source: McpError,
    },
}

impl SessionError {
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::ConnectFailed { .. } => "CONNECT_FAILED",
            SessionError::Closed(_) => "SESSION_CLOSED",
            SessionError::Unknown(_) => "UNKNOWN_SERVER",
            SessionError::Registration(_) => "REGISTRATION_FAILED",
            SessionError::Call { .. } => "CALL_FAILED",
        }
    }
}
