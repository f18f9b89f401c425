//! Wire types for the Model Context Protocol: JSON-RPC 2.0 framing, the
//! initialize handshake and the tools methods.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

pub const DEFAULT_PROTOCOL_VERSION: &str = "2024-11-05";

/// Versions the client can negotiate
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2024-11-05", "2025-03-26"];

pub const JSONRPC_VERSION: &str = "2.0";

/// Interpreter used for `.py` server scripts
pub const PYTHON_COMMAND: &str = "python3";

/// Interpreter used for `.js` server scripts
pub const NODE_COMMAND: &str = "node";

/// How to launch one stdio MCP server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct McpServerConfig {
    /// Server id; every tool it lists is attributed to it
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment for the child process
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    /// `None` negotiates [`DEFAULT_PROTOCOL_VERSION`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<String>,
}

impl McpServerConfig {
    /// Config for a server script launched through its interpreter.
    ///
    /// `.py` runs under python3, `.js` under node; the file stem names the
    /// server.
    pub fn from_script_path(path: impl AsRef<Path>) -> Result<Self, McpError> {
        let path = path.as_ref();
        let command = match path.extension().and_then(|e| e.to_str()) {
            Some("py") => PYTHON_COMMAND,
            Some("js") => NODE_COMMAND,
            _ => {
                return Err(McpError::InvalidParams(
                    "Server script must be a .py or .js file".to_string(),
                ))
            }
        };
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                McpError::InvalidParams(format!("Invalid server script path: {}", path.display()))
            })?
            .to_string();

        Ok(Self {
            name,
            command: command.to_string(),
            args: vec![path.to_string_lossy().into_owned()],
            env: None,
            cwd: None,
            protocol_version: None,
        })
    }

    pub fn protocol_version(&self) -> &str {
        self.protocol_version.as_deref().unwrap_or(DEFAULT_PROTOCOL_VERSION)
    }

    pub fn validate_protocol_version(&self) -> Result<(), String> {
        let version = self.protocol_version();
        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&version) {
            return Err(format!(
                "Unsupported protocol version {} for server {} (supported: {})",
                version,
                self.name,
                SUPPORTED_PROTOCOL_VERSIONS.join(", ")
            ));
        }
        Ok(())
    }
}

// =============================================================================
// JSON-RPC framing
// =============================================================================

/// A request, or a notification when `id` is absent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn call(id: u64, method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: method.to_string(),
            params,
        }
    }

    pub fn notification(method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: method.to_string(),
            params,
        }
    }

    /// One newline-terminated frame
    pub fn to_line(&self) -> Result<String, McpError> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    /// Servers may echo ids as numbers or strings
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Numeric request id, also accepting ids echoed back as strings
    pub fn request_id(&self) -> Option<u64> {
        match &self.id {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// The result payload, or the server's error
    pub fn into_result(self) -> Result<Value, McpError> {
        if let Some(error) = self.error {
            return Err(McpError::ServerError(format!(
                "{} (code: {})",
                error.message, error.code
            )));
        }
        self.result
            .ok_or_else(|| McpError::Protocol("Missing result in response".to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

// =============================================================================
// Handshake
// =============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    /// The agent only consumes tools, so it offers nothing
    pub capabilities: HashMap<String, Value>,
    pub client_info: Implementation,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: Value,
    pub server_info: Implementation,
}

/// Name and version of either side of the connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Implementation {
    pub name: String,
    #[serde(default)]
    pub version: String,
}

// =============================================================================
// Tools
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpTool {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema of the arguments
    #[serde(default)]
    pub input_schema: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListToolsParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    pub tools: Vec<McpTool>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallToolParams {
    pub name: String,
    pub arguments: Value,
}

/// Raw `tools/call` result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpToolCall {
    #[serde(default)]
    pub content: Vec<ToolContent>,
    #[serde(default)]
    pub is_error: bool,
}

impl McpToolCall {
    /// Flatten every content item into text, one item per line
    pub fn into_result(self) -> McpToolResult {
        let content = self
            .content
            .iter()
            .map(ToolContent::as_text)
            .collect::<Vec<_>>()
            .join("\n");
        McpToolResult {
            content,
            is_error: self.is_error,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Resource {
        resource: EmbeddedResource,
    },
    /// Any content type this client does not render, e.g. `audio`
    #[serde(other)]
    Unsupported,
}

impl ToolContent {
    fn as_text(&self) -> String {
        match self {
            ToolContent::Text { text } => text.clone(),
            ToolContent::Image { mime_type, .. } => format!("[image content: {mime_type}]"),
            ToolContent::Resource { resource } => match &resource.text {
                Some(text) => text.clone(),
                None => format!("[resource: {}]", resource.uri),
            },
            ToolContent::Unsupported => "[unsupported content]".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddedResource {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Text resources carry `text`; binary ones carry a base64 `blob`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// A tool call result flattened to text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct McpToolResult {
    pub content: String,
    pub is_error: bool,
}

impl McpToolResult {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum McpError {
    /// The pipe to the server is gone
    #[error("Transport error: {0}")]
    Transport(String),

    /// The server answered with something that is not valid MCP
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Timeout")]
    Timeout,

    /// JSON-RPC error object from the server
    #[error("Server error: {0}")]
    ServerError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    pub fn code(&self) -> &'static str {
        match self {
            McpError::Transport(_) => "TRANSPORT_ERROR",
            McpError::Protocol(_) => "PROTOCOL_ERROR",
            McpError::ToolNotFound(_) => "TOOL_NOT_FOUND",
            McpError::InvalidParams(_) => "INVALID_PARAMS",
            McpError::Timeout => "TIMEOUT",
            McpError::ServerError(_) => "SERVER_ERROR",
            McpError::Io(_) => "IO_ERROR",
            McpError::Json(_) => "JSON_ERROR",
        }
    }

    /// Whether the session can no longer be used after this error
    pub fn is_fatal(&self) -> bool {
        matches!(self, McpError::Transport(_) | McpError::Io(_))
    }
}
