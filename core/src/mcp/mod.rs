/// Model Context Protocol (MCP) integration
///
/// Connects to MCP servers over stdio, discovers their tools and forwards
/// tool calls to them.
///
/// MCP Protocol Spec: https://spec.modelcontextprotocol.io/specification/
///
/// Architecture:
/// - `client`: Low-level MCP stdio client
/// - `session`: `McpSession`/`McpConnector` seam and the session handle
/// - `manager`: Owns every server session and its health
/// - `types`: MCP protocol types (JSON-RPC 2.0 based)
pub mod client;
pub mod manager;
pub mod session;
pub mod types;

pub use client::McpClient;
pub use manager::{ConnectPolicy, ServerOutcome, SessionManager, ShutdownReport};
pub use session::{Liveness, McpConnector, McpSession, SessionError, SessionHandle, StdioConnector};
pub use types::{
    McpError, McpServerConfig, McpTool, McpToolCall, McpToolResult, DEFAULT_PROTOCOL_VERSION,
    SUPPORTED_PROTOCOL_VERSIONS,
};
