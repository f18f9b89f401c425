use crate::context::{Message, ToolCall};
use crate::tools::ToolDescriptor;
use async_trait::async_trait;
use std::time::Duration;

/// Everything the model sees for one completion
#[derive(Debug, Clone, Default)]
pub struct ModelRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDescriptor>,
}

impl ModelRequest {
    pub fn new(messages: Vec<Message>, tools: Vec<ToolDescriptor>) -> Self {
        Self { messages, tools }
    }
}

/// What the model answered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelResponse {
    /// A plain answer; ends the query
    Content(String),
    /// The model wants tools run before it answers
    ToolCalls {
        content: Option<String>,
        calls: Vec<ToolCall>,
    },
}

impl ModelResponse {
    pub fn is_tool_calls(&self) -> bool {
        matches!(self, ModelResponse::ToolCalls { .. })
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ModelError {
    #[error("Model request failed: {0}")]
    Request(String),

    #[error("Model API returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Model call timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Invalid model response: {0}")]
    InvalidResponse(String),
}

impl ModelError {
    /// Network failures, rate limits and server errors are worth retrying.
    /// Timeouts are not: the caller already waited the full budget.
    pub fn is_transient(&self) -> bool {
        match self {
            ModelError::Request(_) => true,
            ModelError::Status { status, .. } => *status == 429 || *status >= 500,
            ModelError::Timeout(_) | ModelError::InvalidResponse(_) => false,
        }
    }
}

/// A language model behind a chat-style API
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ModelError>;

    /// Model identifier, used to pick the token estimator
    fn model_name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        assert!(ModelError::Request("connection reset".into()).is_transient());
        assert!(ModelError::Status { status: 429, body: String::new() }.is_transient());
        assert!(ModelError::Status { status: 503, body: String::new() }.is_transient());
        assert!(!ModelError::Status { status: 401, body: String::new() }.is_transient());
        assert!(!ModelError::Timeout(Duration::from_secs(30)).is_transient());
    }

    #[test]
    fn test_timeout_message() {
        let e = ModelError::Timeout(Duration::from_secs(30));
        assert_eq!(e.to_string(), "Model call timed out after 30s");
    }
}
