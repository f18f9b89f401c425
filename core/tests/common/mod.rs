//! Shared in-memory fakes for the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tiny_agents_core::mcp::{McpError, McpTool, McpToolResult};
use tiny_agents_core::{
    McpConnector, McpServerConfig, McpSession, ModelError, ModelProvider, ModelRequest,
    ModelResponse, ToolCall,
};

// =============================================================================
// Fake MCP servers
// =============================================================================

/// How a fake tool answers
#[derive(Clone, Debug)]
pub enum Behavior {
    Reply(String),
    /// Result flagged `isError`
    ToolError(String),
    /// JSON-RPC error from the server
    ServerError(String),
    /// Broken pipe: the session is unusable afterwards
    Transport(String),
    /// Reply after a delay
    Slow(Duration, String),
    /// Echo the arguments back as text
    Echo,
}

pub struct FakeSession {
    tools: Vec<McpTool>,
    behaviors: HashMap<String, Behavior>,
    pub calls: Mutex<Vec<(String, Value)>>,
    pub closed: AtomicBool,
    close_error: Option<String>,
    close_delay: Option<Duration>,
    list_error: Option<String>,
}

impl FakeSession {
    pub fn new(tools: &[(&str, Behavior)]) -> Self {
        Self {
            tools: tools.iter().map(|(name, _)| tool(name)).collect(),
            behaviors: tools
                .iter()
                .map(|(name, b)| (name.to_string(), b.clone()))
                .collect(),
            calls: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            close_error: None,
            close_delay: None,
            list_error: None,
        }
    }

    /// Session whose `tools/list` fails
    pub fn failing_list(mut self, error: &str) -> Self {
        self.list_error = Some(error.to_string());
        self
    }

    pub fn failing_close(mut self, error: &str) -> Self {
        self.close_error = Some(error.to_string());
        self
    }

    pub fn hanging_close(mut self, delay: Duration) -> Self {
        self.close_delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub fn tool(name: &str) -> McpTool {
    McpTool {
        name: name.to_string(),
        description: Some(format!("{name} tool")),
        input_schema: json!({"type": "object", "properties": {"n": {"type": "integer"}}}),
    }
}

#[async_trait]
impl McpSession for FakeSession {
    async fn list_tools(&self) -> Result<Vec<McpTool>, McpError> {
        match &self.list_error {
            Some(e) => Err(McpError::Protocol(e.clone())),
            None => Ok(self.tools.clone()),
        }
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<McpToolResult, McpError> {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), arguments.clone()));
        match self.behaviors.get(name) {
            None => Err(McpError::ToolNotFound(name.to_string())),
            Some(Behavior::Reply(text)) => Ok(McpToolResult::text(text.clone())),
            Some(Behavior::ToolError(text)) => Ok(McpToolResult::error(text.clone())),
            Some(Behavior::ServerError(text)) => Err(McpError::ServerError(text.clone())),
            Some(Behavior::Transport(text)) => Err(McpError::Transport(text.clone())),
            Some(Behavior::Slow(delay, text)) => {
                tokio::time::sleep(*delay).await;
                Ok(McpToolResult::text(text.clone()))
            }
            Some(Behavior::Echo) => Ok(McpToolResult::text(arguments.to_string())),
        }
    }

    async fn close(&self) -> Result<(), McpError> {
        if let Some(delay) = self.close_delay {
            tokio::time::sleep(delay).await;
        }
        self.closed.store(true, Ordering::SeqCst);
        match &self.close_error {
            Some(e) => Err(McpError::Transport(e.clone())),
            None => Ok(()),
        }
    }
}

struct FakeServer {
    session: Arc<FakeSession>,
    /// Connect attempts that fail before one succeeds; `u32::MAX` never succeeds
    failures: u32,
}

/// Connector that hands out pre-built fake sessions by server name
#[derive(Default)]
pub struct FakeConnector {
    servers: HashMap<String, FakeServer>,
    attempts: Mutex<HashMap<String, u32>>,
    pub connects: AtomicU32,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_server(mut self, name: &str, session: Arc<FakeSession>) -> Self {
        self.servers.insert(
            name.to_string(),
            FakeServer {
                session,
                failures: 0,
            },
        );
        self
    }

    /// Server whose first `failures` connects fail
    pub fn with_flaky_server(mut self, name: &str, session: Arc<FakeSession>, failures: u32) -> Self {
        self.servers
            .insert(name.to_string(), FakeServer { session, failures });
        self
    }

    pub fn with_unreachable_server(self, name: &str) -> Self {
        self.with_flaky_server(name, Arc::new(FakeSession::new(&[])), u32::MAX)
    }

    pub fn attempts(&self, name: &str) -> u32 {
        self.attempts
            .lock()
            .unwrap()
            .get(name)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl McpConnector for FakeConnector {
    async fn connect(&self, config: &McpServerConfig) -> Result<Arc<dyn McpSession>, McpError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let n = attempts.entry(config.name.clone()).or_insert(0);
            *n += 1;
            *n
        };
        let server = self
            .servers
            .get(&config.name)
            .ok_or_else(|| McpError::Transport(format!("no such server: {}", config.name)))?;
        if attempt <= server.failures {
            return Err(McpError::Transport(format!(
                "connection refused (attempt {attempt})"
            )));
        }
        let session: Arc<dyn McpSession> = server.session.clone();
        Ok(session)
    }
}

pub fn server_config(name: &str) -> McpServerConfig {
    McpServerConfig {
        name: name.to_string(),
        command: "fake".to_string(),
        args: vec![],
        env: None,
        cwd: None,
        protocol_version: None,
    }
}

// =============================================================================
// Scripted model
// =============================================================================

/// Model that replays a fixed script of responses, then answers "done"
pub struct ScriptedModel {
    script: Mutex<VecDeque<Result<ModelResponse, ModelError>>>,
    pub requests: Mutex<Vec<ModelRequest>>,
    delay: Option<Duration>,
    name: String,
}

impl ScriptedModel {
    pub fn new(script: Vec<Result<ModelResponse, ModelError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
            delay: None,
            name: "gpt-4.1".to_string(),
        }
    }

    /// Model that always asks for the same tool
    pub fn looping(tool_name: &str, times: usize) -> Self {
        let script = (0..times)
            .map(|i| Ok(tool_calls(&[(&format!("call_{i}"), tool_name, "{}")])))
            .collect();
        Self::new(script)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<ModelRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl ModelProvider for ScriptedModel {
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
        self.requests.lock().unwrap().push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(ModelResponse::Content("done".to_string())))
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}

pub fn tool_calls(calls: &[(&str, &str, &str)]) -> ModelResponse {
    ModelResponse::ToolCalls {
        content: None,
        calls: calls
            .iter()
            .map(|(id, name, args)| ToolCall::new(*id, *name, *args))
            .collect(),
    }
}

pub fn content(text: &str) -> ModelResponse {
    ModelResponse::Content(text.to_string())
}
