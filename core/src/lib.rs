// Tiny Agents Core Library
// MCP tool-calling agent loop runtime

pub mod agent;
pub mod config;
pub mod context;
pub mod llm;
pub mod mcp;
pub mod plugin;
pub mod telemetry;
pub mod tools;

// Export core types
pub use agent::{Agent, Command, ConversationEngine, EngineOptions, EngineState, ToolCallDispatcher};
pub use config::AgentConfig;
pub use context::{ConversationHistory, Message, Role, TokenBudget, ToolCall};
pub use llm::{LlmClientConfig, ModelError, ModelProvider, ModelRequest, ModelResponse, OpenAiClient};
pub use mcp::{
    ConnectPolicy, Liveness, McpConnector, McpServerConfig, McpSession, ServerOutcome,
    SessionError, SessionHandle, SessionManager, ShutdownReport, StdioConnector,
};
pub use plugin::{AgentPlugin, PluginManager};
pub use telemetry::{SessionSnapshot, SessionState};
pub use tools::{ToolDescriptor, ToolError, ToolRegistry};

// Error types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Context overflow: the current turn needs {required} tokens but only {available} are available")]
    ContextOverflow { required: usize, available: usize },

    #[error("Max iterations exceeded: model kept requesting tools after {0} rounds")]
    MaxIterationsExceeded(usize),

    #[error("Query cancelled")]
    Cancelled,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl AgentError {
    /// Stable error code for logs and hooks
    pub fn code(&self) -> &'static str {
        match self {
            AgentError::Model(ModelError::Timeout(_)) => "MODEL_TIMEOUT",
            AgentError::Model(_) => "MODEL_ERROR",
            AgentError::Session(_) => "SESSION_ERROR",
            AgentError::Tool(_) => "TOOL_ERROR",
            AgentError::ContextOverflow { .. } => "CONTEXT_OVERFLOW",
            AgentError::MaxIterationsExceeded(_) => "MAX_ITERATIONS_EXCEEDED",
            AgentError::Cancelled => "CANCELLED",
            AgentError::Protocol(_) => "PROTOCOL_ERROR",
            AgentError::Config(_) => "CONFIG_ERROR",
            AgentError::IoError(_) => "IO_ERROR",
            AgentError::SerializationError(_) => "JSON_ERROR",
        }
    }

    /// Message suitable for showing to the person at the prompt
    pub fn user_message(&self) -> String {
        match self {
            AgentError::Model(ModelError::Timeout(d)) => format!(
                "The model did not answer within {}s. Please try again.",
                d.as_secs()
            ),
            AgentError::Model(e) => format!("Failed to get a response from the model: {e}"),
            AgentError::ContextOverflow { required, available } => format!(
                "This request is too large for the context window ({required} tokens needed, {available} available). Try a shorter query."
            ),
            AgentError::MaxIterationsExceeded(n) => format!(
                "Stopped after {n} tool-calling rounds without a final answer."
            ),
            AgentError::Cancelled => "Query interrupted.".to_string(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
