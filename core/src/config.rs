//! Agent configuration
//!
//! Every field has a default, so a partial TOML table or an empty
//! environment still yields a usable config.

use crate::mcp::McpServerConfig;
use crate::{AgentError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "openai/gpt-4.1";
pub const DEFAULT_MAX_CONTEXT_TOKENS: usize = 16_000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    pub model: String,
    /// OpenAI-compatible endpoint; `None` uses `OPENAI_BASE_URL` or the OpenAI API
    pub base_url: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub temperature: Option<f32>,
    pub max_context_tokens: usize,
    /// Tokens held back for the model's reply
    pub reserve_tokens: usize,
    pub tool_call_timeout_ms: u64,
    pub model_timeout_ms: u64,
    /// Tool-calling rounds allowed per query
    pub max_iterations: usize,
    /// Retries for transient model failures
    pub model_retries: u32,
    pub model_retry_backoff_ms: u64,
    pub connect_attempts: u32,
    pub connect_backoff_ms: u64,
    pub connect_timeout_ms: u64,
    pub close_timeout_ms: u64,
    /// Run the tool calls of one turn concurrently
    pub parallel_tool_calls: bool,
    /// Replaces the built-in system prompt when set
    pub system_prompt: Option<String>,
    pub servers: Vec<McpServerConfig>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            base_url: None,
            api_key: None,
            temperature: None,
            max_context_tokens: DEFAULT_MAX_CONTEXT_TOKENS,
            reserve_tokens: crate::context::DEFAULT_RESERVE_TOKENS,
            tool_call_timeout_ms: 30_000,
            model_timeout_ms: 30_000,
            max_iterations: 10,
            model_retries: 2,
            model_retry_backoff_ms: 1_000,
            connect_attempts: 3,
            connect_backoff_ms: 500,
            connect_timeout_ms: 30_000,
            close_timeout_ms: 5_000,
            parallel_tool_calls: false,
            system_prompt: None,
            servers: Vec::new(),
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|v| v.parse::<T>().ok())
}

impl AgentConfig {
    /// Defaults overlaid with environment variables
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env();
        cfg
    }

    /// Overlay `TINY_AGENT_*` and `OPENAI_*` variables that are set
    pub fn apply_env(&mut self) {
        if let Some(v) = env_string("TINY_AGENT_MODEL") {
            self.model = v;
        }
        if let Some(v) = env_string("OPENAI_BASE_URL") {
            self.base_url = Some(v);
        }
        if let Some(v) = env_string("OPENAI_API_KEY") {
            self.api_key = Some(v);
        }
        if let Some(v) = env_parse("TINY_AGENT_TEMPERATURE") {
            self.temperature = Some(v);
        }
        if let Some(v) = env_parse("TINY_AGENT_MAX_CONTEXT_TOKENS") {
            self.max_context_tokens = v;
        }
        if let Some(v) = env_parse("TINY_AGENT_RESERVE_TOKENS") {
            self.reserve_tokens = v;
        }
        if let Some(v) = env_parse("TINY_AGENT_TOOL_TIMEOUT_MS") {
            self.tool_call_timeout_ms = v;
        }
        if let Some(v) = env_parse("TINY_AGENT_MODEL_TIMEOUT_MS") {
            self.model_timeout_ms = v;
        }
        if let Some(v) = env_parse("TINY_AGENT_MAX_ITERATIONS") {
            self.max_iterations = v;
        }
        if let Some(v) = env_parse("TINY_AGENT_MODEL_RETRIES") {
            self.model_retries = v;
        }
        if let Some(v) = env_parse("TINY_AGENT_CONNECT_ATTEMPTS") {
            self.connect_attempts = v;
        }
        if let Some(v) = env_parse("TINY_AGENT_PARALLEL_TOOL_CALLS") {
            self.parallel_tool_calls = v;
        }
        if let Some(v) = env_string("TINY_AGENT_SYSTEM_PROMPT") {
            self.system_prompt = Some(v);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(AgentError::Config("model must not be empty".into()));
        }
        if self.reserve_tokens >= self.max_context_tokens {
            return Err(AgentError::Config(format!(
                "reserve_tokens ({}) must be smaller than max_context_tokens ({})",
                self.reserve_tokens, self.max_context_tokens
            )));
        }
        if self.max_iterations == 0 {
            return Err(AgentError::Config("max_iterations must be at least 1".into()));
        }
        if self.connect_attempts == 0 {
            return Err(AgentError::Config("connect_attempts must be at least 1".into()));
        }
        if self.tool_call_timeout_ms == 0 || self.model_timeout_ms == 0 {
            return Err(AgentError::Config("timeouts must be greater than zero".into()));
        }
        let mut names = std::collections::HashSet::new();
        for server in &self.servers {
            if !names.insert(server.name.as_str()) {
                return Err(AgentError::Config(format!(
                    "duplicate server name: {}",
                    server.name
                )));
            }
            server
                .validate_protocol_version()
                .map_err(AgentError::Config)?;
        }
        Ok(())
    }

    pub fn tool_call_timeout(&self) -> Duration {
        Duration::from_millis(self.tool_call_timeout_ms)
    }

    pub fn model_timeout(&self) -> Duration {
        Duration::from_millis(self.model_timeout_ms)
    }

    pub fn model_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.model_retry_backoff_ms)
    }

    pub fn connect_policy(&self) -> crate::mcp::ConnectPolicy {
        crate::mcp::ConnectPolicy {
            attempts: self.connect_attempts,
            backoff: Duration::from_millis(self.connect_backoff_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            close_timeout: Duration::from_millis(self.close_timeout_ms),
        }
    }

    pub fn llm_client_config(&self) -> crate::llm::LlmClientConfig {
        let mut cfg = crate::llm::LlmClientConfig::default();
        cfg.model = self.model.clone();
        if let Some(url) = &self.base_url {
            cfg.base_url = url.clone();
        }
        if self.api_key.is_some() {
            cfg.api_key = self.api_key.clone();
        }
        if self.temperature.is_some() {
            cfg.temperature = self.temperature;
        }
        cfg.request_timeout_ms = self.model_timeout_ms;
        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = AgentConfig::default();
        assert_eq!(cfg.max_context_tokens, 16_000);
        assert_eq!(cfg.max_iterations, 10);
        assert_eq!(cfg.tool_call_timeout(), Duration::from_secs(30));
        assert!(!cfg.parallel_tool_calls);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let cfg: AgentConfig =
            serde_json::from_str(r#"{"model": "gpt-4o", "max_iterations": 3}"#).unwrap();
        assert_eq!(cfg.model, "gpt-4o");
        assert_eq!(cfg.max_iterations, 3);
        assert_eq!(cfg.reserve_tokens, 1000);
    }

    #[test]
    fn test_validate_rejects_reserve_over_window() {
        let cfg = AgentConfig {
            max_context_tokens: 500,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(AgentError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_duplicate_servers() {
        let server = McpServerConfig::from_script_path("fib.py").unwrap();
        let cfg = AgentConfig {
            servers: vec![server.clone(), server],
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }
}
