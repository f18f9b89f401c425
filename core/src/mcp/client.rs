//! Stdio MCP client.
//!
//! One child process per server. Requests are newline-delimited JSON-RPC 2.0
//! frames on its stdin; a reader task routes responses from its stdout back
//! to the waiting caller by id.

use super::session::McpSession;
use super::types::*;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, warn};

const CLIENT_NAME: &str = "tiny-agents";

type Waiters = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

pub struct McpClient {
    config: McpServerConfig,
    request_timeout: Duration,
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<ChildStdin>>,
    next_id: AtomicU64,
    waiters: Waiters,
    peer: Mutex<Option<Implementation>>,
    /// Set on disconnect and when the server's stdout reaches EOF
    closed: Arc<AtomicBool>,
}

impl McpClient {
    pub fn new(config: McpServerConfig, request_timeout: Duration) -> Self {
        Self {
            config,
            request_timeout,
            child: Mutex::new(None),
            stdin: Mutex::new(None),
            next_id: AtomicU64::new(1),
            waiters: Arc::new(Mutex::new(HashMap::new())),
            peer: Mutex::new(None),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Name and version the server reported during the handshake
    pub async fn peer_info(&self) -> Option<Implementation> {
        self.peer.lock().await.clone()
    }

    /// Spawn the server and complete the initialize handshake.
    ///
    /// On any handshake failure the process is killed before returning.
    pub async fn connect(&self) -> Result<(), McpError> {
        info!(
            target: "mcp_client",
            server = %self.config.name,
            command = %self.config.command,
            "Launching MCP server"
        );

        let (child, stdin, stdout) = self.spawn_process()?;
        *self.stdin.lock().await = Some(stdin);
        *self.child.lock().await = Some(child);
        self.closed.store(false, Ordering::SeqCst);
        self.route_responses(stdout);

        match self.handshake().await {
            Ok(peer) => {
                *self.peer.lock().await = Some(peer);
                Ok(())
            }
            Err(e) => {
                warn!(target: "mcp_client", server = %self.config.name, error = %e, "Handshake failed");
                self.disconnect().await?;
                Err(e)
            }
        }
    }

    fn spawn_process(&self) -> Result<(Child, ChildStdin, ChildStdout), McpError> {
        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(env) = &self.config.env {
            cmd.envs(env);
        }
        if let Some(cwd) = &self.config.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(|e| {
            error!(target: "mcp_client", server = %self.config.name, error = %e, "Spawn failed");
            McpError::Transport(format!("Failed to spawn {}: {}", self.config.command, e))
        })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Transport("child stdin not piped".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Transport("child stdout not piped".to_string()))?;
        Ok((child, stdin, stdout))
    }

    async fn handshake(&self) -> Result<Implementation, McpError> {
        let params = InitializeParams {
            protocol_version: self.config.protocol_version().to_string(),
            capabilities: HashMap::new(),
            client_info: Implementation {
                name: CLIENT_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };
        let raw = self.request("initialize", Some(json!(params))).await?;
        let init: InitializeResult = decode(raw, "initialize")?;

        self.write_frame(&JsonRpcRequest::notification("notifications/initialized", None))
            .await?;

        info!(
            target: "mcp_client",
            server = %self.config.name,
            peer = %init.server_info.name,
            peer_version = %init.server_info.version,
            protocol = %init.protocol_version,
            "MCP server initialized"
        );
        Ok(init.server_info)
    }

    /// Kill the server and fail every pending request
    pub async fn disconnect(&self) -> Result<(), McpError> {
        self.closed.store(true, Ordering::SeqCst);

        if let Some(mut stdin) = self.stdin.lock().await.take() {
            let _ = stdin.shutdown().await;
        }
        if let Some(mut child) = self.child.lock().await.take() {
            info!(target: "mcp_client", server = %self.config.name, "Stopping MCP server");
            // Already exited is fine
            let _ = child.kill().await;
            let _ = child.wait().await;
        }
        self.waiters.lock().await.clear();
        Ok(())
    }

    /// Every tool the server offers, across all pages
    pub async fn fetch_tools(&self) -> Result<Vec<McpTool>, McpError> {
        let mut tools = Vec::new();
        let mut cursor = None;
        loop {
            let raw = self
                .request("tools/list", Some(json!(ListToolsParams { cursor })))
                .await?;
            let page: ListToolsResult = decode(raw, "tools/list")?;
            tools.extend(page.tools);
            cursor = page.next_cursor;
            if cursor.is_none() {
                break;
            }
        }
        debug!(target: "mcp_client", server = %self.config.name, count = tools.len(), "Fetched tools");
        Ok(tools)
    }

    pub async fn invoke_tool(&self, name: &str, arguments: Value) -> Result<McpToolResult, McpError> {
        debug!(target: "mcp_client", server = %self.config.name, tool = %name, "Invoking tool");
        let params = CallToolParams {
            name: name.to_string(),
            arguments,
        };
        let raw = self.request("tools/call", Some(json!(params))).await?;
        let result = decode::<McpToolCall>(raw, "tools/call")?.into_result();
        if result.is_error {
            debug!(target: "mcp_client", server = %self.config.name, tool = %name, "Tool reported an error");
        }
        Ok(result)
    }

    async fn write_frame(&self, frame: &JsonRpcRequest) -> Result<(), McpError> {
        let line = frame.to_line()?;
        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| McpError::Transport("not connected".to_string()))?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(McpError::Transport("session is closed".to_string()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().await.insert(id, tx);
        // Also covers callers that drop this future early
        let _waiter = WaiterGuard {
            waiters: &self.waiters,
            id,
        };

        self.write_frame(&JsonRpcRequest::call(id, method, params)).await?;

        match timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => response.into_result(),
            // Sender dropped: the reader saw EOF or we disconnected
            Ok(Err(_)) => Err(McpError::Transport("server closed the connection".to_string())),
            Err(_) => {
                warn!(target: "mcp_client", server = %self.config.name, method, "Request timed out");
                Err(McpError::Timeout)
            }
        }
    }

    #[cfg(test)]
    async fn waiting(&self) -> usize {
        self.waiters.lock().await.len()
    }

    fn route_responses(&self, stdout: ChildStdout) {
        let waiters = Arc::clone(&self.waiters);
        let closed = Arc::clone(&self.closed);
        let server = self.config.name.clone();

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let Some(response) = parse_response(&line, &server) else {
                    continue;
                };
                let Some(id) = response.request_id() else {
                    continue;
                };
                match waiters.lock().await.remove(&id) {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => warn!(target: "mcp_client", server = %server, id, "Response for unknown request"),
                }
            }

            closed.store(true, Ordering::SeqCst);
            waiters.lock().await.clear();
            debug!(target: "mcp_client", server = %server, "Server stdout closed");
        });
    }
}

/// Removes a request's waiter when the request ends, however it ends
struct WaiterGuard<'a> {
    waiters: &'a Waiters,
    id: u64,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut waiters) = self.waiters.try_lock() {
            waiters.remove(&self.id);
            return;
        }
        // The reader holds the lock; finish the removal once it lets go
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let waiters = Arc::clone(self.waiters);
            let id = self.id;
            handle.spawn(async move {
                waiters.lock().await.remove(&id);
            });
        }
    }
}

/// A response frame, or `None` for log noise and server-initiated messages
fn parse_response(line: &str, server: &str) -> Option<JsonRpcResponse> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let value: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(_) => {
            debug!(target: "mcp_client", server = %server, "Ignoring non-JSON stdout line");
            return None;
        }
    };
    if value.get("method").is_some() {
        return None;
    }
    match serde_json::from_value(value) {
        Ok(response) => Some(response),
        Err(e) => {
            warn!(target: "mcp_client", server = %server, error = %e, "Malformed JSON-RPC response");
            None
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(raw: Value, method: &str) -> Result<T, McpError> {
    serde_json::from_value(raw)
        .map_err(|e| McpError::Protocol(format!("Invalid {} result: {}", method, e)))
}

#[async_trait]
impl McpSession for McpClient {
    async fn list_tools(&self) -> Result<Vec<McpTool>, McpError> {
        self.fetch_tools().await
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<McpToolResult, McpError> {
        self.invoke_tool(name, arguments).await
    }

    async fn close(&self) -> Result<(), McpError> {
        self.disconnect().await
    }
}
