use super::provider::{ModelError, ModelProvider, ModelRequest, ModelResponse};
use crate::context::{Message, Role, ToolCall};
use crate::{AgentError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error};

/// Configuration for OpenAiClient loaded from environment variables
#[derive(Debug, Clone)]
pub struct LlmClientConfig {
    pub base_url: String, // e.g., https://api.openai.com/v1
    pub model: String,    // e.g., openai/gpt-4.1
    pub api_key: Option<String>,
    pub request_timeout_ms: u64,
    pub temperature: Option<f32>,
}

impl Default for LlmClientConfig {
    fn default() -> Self {
        Self {
            base_url: std::env::var("OPENAI_BASE_URL")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            model: std::env::var("TINY_AGENT_MODEL")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| crate::config::DEFAULT_MODEL.to_string()),
            api_key: std::env::var("OPENAI_API_KEY")
                .ok()
                .filter(|s| !s.is_empty()),
            request_timeout_ms: 30_000,
            temperature: std::env::var("TINY_AGENT_TEMPERATURE")
                .ok()
                .and_then(|v| v.parse::<f32>().ok()),
        }
    }
}

/// Chat Completions client for OpenAI-compatible backends
#[derive(Clone)]
pub struct OpenAiClient {
    http: Client,
    cfg: LlmClientConfig,
}

impl OpenAiClient {
    pub fn new(cfg: LlmClientConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(cfg.request_timeout_ms))
            .build()
            .map_err(|e| AgentError::Config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { http, cfg })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(LlmClientConfig::default())
    }

    pub fn config(&self) -> &LlmClientConfig {
        &self.cfg
    }

    /// Model id as sent on the wire, without a routing prefix such as `openai/`
    fn wire_model(&self) -> &str {
        self.cfg
            .model
            .strip_prefix("openai/")
            .unwrap_or(&self.cfg.model)
    }

    fn build_body(&self, request: &ModelRequest) -> Value {
        let messages: Vec<Value> = request.messages.iter().map(message_to_wire).collect();
        let mut body = json!({
            "model": self.wire_model(),
            "messages": messages,
        });
        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|t| t.to_function_schema())
                .collect();
            body["tools"] = json!(tools);
            body["tool_choice"] = json!("auto");
        }
        if let Some(t) = self.cfg.temperature {
            body["temperature"] = json!(t);
        }
        body
    }
}

#[async_trait]
impl ModelProvider for OpenAiClient {
    async fn complete(&self, request: ModelRequest) -> std::result::Result<ModelResponse, ModelError> {
        let chat_url = format!(
            "{}/chat/completions",
            self.cfg.base_url.trim_end_matches('/')
        );
        debug!(
            target: "llm_client",
            url = %chat_url,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "POST chat completions"
        );

        let mut req = self
            .http
            .post(&chat_url)
            .header("content-type", "application/json");
        if let Some(key) = &self.cfg.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.json(&self.build_body(&request)).send().await.map_err(|e| {
            if e.is_timeout() {
                ModelError::Timeout(Duration::from_millis(self.cfg.request_timeout_ms))
            } else {
                ModelError::Request(e.to_string())
            }
        })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            error!(target: "llm_client", %status, body = %text, "Chat Completions error");
            return Err(ModelError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let val: Value = resp
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(format!("Failed to parse Chat Completions JSON: {e}")))?;
        parse_chat_response(&val)
    }

    fn model_name(&self) -> &str {
        &self.cfg.model
    }
}

/// Chat Completions wire form of one message
fn message_to_wire(message: &Message) -> Value {
    let mut v = json!({
        "role": message.role.to_string(),
        "content": message.content,
    });
    if message.has_tool_calls() {
        let calls: Vec<Value> = message
            .tool_calls
            .iter()
            .map(|c| {
                json!({
                    "id": c.id,
                    "type": "function",
                    "function": {"name": c.name, "arguments": c.arguments},
                })
            })
            .collect();
        v["tool_calls"] = json!(calls);
    }
    if message.role == Role::Tool {
        if let Some(id) = &message.tool_call_id {
            v["tool_call_id"] = json!(id);
        }
        if let Some(name) = &message.name {
            v["name"] = json!(name);
        }
    }
    v
}

/// Interpret `choices[0].message` of a Chat Completions response.
///
/// Tool arguments are kept as raw text so malformed JSON reaches the
/// dispatcher instead of failing the turn.
pub fn parse_chat_response(v: &Value) -> std::result::Result<ModelResponse, ModelError> {
    let message = v
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .ok_or_else(|| ModelError::InvalidResponse("missing choices[0].message".to_string()))?;

    let content = message
        .get("content")
        .and_then(|c| c.as_str())
        .map(|s| s.to_string());

    let mut calls = Vec::new();
    if let Some(tc_arr) = message.get("tool_calls").and_then(|x| x.as_array()) {
        for (i, tc) in tc_arr.iter().enumerate() {
            // Nameless calls are kept; the dispatcher answers them as unknown tools
            let func = tc.get("function");
            let name = func
                .and_then(|f| f.get("name"))
                .and_then(|n| n.as_str())
                .unwrap_or_default()
                .to_string();
            let id = tc
                .get("id")
                .and_then(|x| x.as_str())
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
                .unwrap_or_else(|| format!("call_{i}"));
            let arguments = match func.and_then(|f| f.get("arguments")) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            };
            calls.push(ToolCall::new(id, name, arguments));
        }
    }

    if calls.is_empty() {
        Ok(ModelResponse::Content(content.unwrap_or_default()))
    } else {
        Ok(ModelResponse::ToolCalls { content, calls })
    }
}
