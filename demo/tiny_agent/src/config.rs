use std::fs;
use std::path::Path;

use tiny_agents_core::{AgentConfig, McpServerConfig};

/// Load configuration from a TOML file (path via TINY_AGENT_CONFIG or ./tiny_agent.toml),
/// overlaying values onto defaults and env-driven defaults.
pub fn load() -> AgentConfig {
    let default = AgentConfig::from_env();
    let path = std::env::var("TINY_AGENT_CONFIG").unwrap_or_else(|_| "tiny_agent.toml".into());
    let p = Path::new(&path);
    if !p.exists() {
        tracing::info!(target: "tiny_agent", path = %path, "No TOML config found; using defaults/env");
        return default;
    }
    match fs::read_to_string(p) {
        Ok(s) => match parse(&s) {
            Ok(t) => t.overlay(default),
            Err(e) => {
                tracing::warn!(target: "tiny_agent", error = %e, "Failed to parse TOML; using defaults");
                default
            }
        },
        Err(e) => {
            tracing::warn!(target: "tiny_agent", error = %e, "Failed to read TOML; using defaults");
            default
        }
    }
}

fn parse(s: &str) -> Result<TinyAgentToml, toml::de::Error> {
    toml::from_str::<TinyAgentToml>(s)
}

// Every field is optional; unset fields keep the env-derived value.

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct TinyAgentToml {
    pub system_prompt: Option<String>,
    pub llm: Option<LlmToml>,
    pub context: Option<ContextToml>,
    pub tools: Option<ToolsToml>,
    pub connect: Option<ConnectToml>,
    #[serde(default)]
    pub servers: Vec<McpServerConfig>,
}

impl TinyAgentToml {
    fn overlay(self, mut base: AgentConfig) -> AgentConfig {
        if let Some(p) = self.system_prompt {
            base.system_prompt = Some(p);
        }
        if let Some(l) = self.llm {
            l.apply(&mut base);
        }
        if let Some(c) = self.context {
            c.apply(&mut base);
        }
        if let Some(t) = self.tools {
            t.apply(&mut base);
        }
        if let Some(c) = self.connect {
            c.apply(&mut base);
        }
        base.servers.extend(self.servers);
        base
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct LlmToml {
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub timeout_ms: Option<u64>,
    pub temperature: Option<f32>,
    pub retries: Option<u32>,
    pub retry_backoff_ms: Option<u64>,
}
impl LlmToml {
    fn apply(self, c: &mut AgentConfig) {
        if let Some(x) = self.base_url {
            c.base_url = Some(x);
        }
        if let Some(x) = self.model {
            c.model = x;
        }
        if let Some(x) = self.api_key {
            c.api_key = Some(x);
        }
        if let Some(x) = self.timeout_ms {
            c.model_timeout_ms = x;
        }
        if let Some(x) = self.temperature {
            c.temperature = Some(x);
        }
        if let Some(x) = self.retries {
            c.model_retries = x;
        }
        if let Some(x) = self.retry_backoff_ms {
            c.model_retry_backoff_ms = x;
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct ContextToml {
    pub max_tokens: Option<usize>,
    pub reserve_tokens: Option<usize>,
    pub max_iterations: Option<usize>,
}
impl ContextToml {
    fn apply(self, c: &mut AgentConfig) {
        if let Some(x) = self.max_tokens {
            c.max_context_tokens = x;
        }
        if let Some(x) = self.reserve_tokens {
            c.reserve_tokens = x;
        }
        if let Some(x) = self.max_iterations {
            c.max_iterations = x;
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct ToolsToml {
    pub call_timeout_ms: Option<u64>,
    pub parallel: Option<bool>,
}
impl ToolsToml {
    fn apply(self, c: &mut AgentConfig) {
        if let Some(x) = self.call_timeout_ms {
            c.tool_call_timeout_ms = x;
        }
        if let Some(x) = self.parallel {
            c.parallel_tool_calls = x;
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct ConnectToml {
    pub attempts: Option<u32>,
    pub backoff_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub close_timeout_ms: Option<u64>,
}
impl ConnectToml {
    fn apply(self, c: &mut AgentConfig) {
        if let Some(x) = self.attempts {
            c.connect_attempts = x.max(1);
        }
        if let Some(x) = self.backoff_ms {
            c.connect_backoff_ms = x;
        }
        if let Some(x) = self.timeout_ms {
            c.connect_timeout_ms = x;
        }
        if let Some(x) = self.close_timeout_ms {
            c.close_timeout_ms = x;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlay_keeps_unset_fields() {
        let toml = parse(
            r#"
            system_prompt = "Be brief."

            [llm]
            model = "openai/gpt-4o-mini"
            temperature = 0.2

            [context]
            max_tokens = 8000

            [[servers]]
            name = "math"
            command = "python3"
            args = ["math_server.py"]
            "#,
        )
        .unwrap();

        let cfg = toml.overlay(AgentConfig::default());

        assert_eq!(cfg.model, "openai/gpt-4o-mini");
        assert_eq!(cfg.temperature, Some(0.2));
        assert_eq!(cfg.max_context_tokens, 8000);
        assert_eq!(cfg.system_prompt.as_deref(), Some("Be brief."));
        assert_eq!(cfg.max_iterations, AgentConfig::default().max_iterations);
        assert_eq!(cfg.servers.len(), 1);
        assert_eq!(cfg.servers[0].args, vec!["math_server.py".to_string()]);
        cfg.validate().unwrap();
    }

    #[test]
    fn test_parse_errors_are_reported() {
        assert!(parse("[llm]\nmodel = 3").is_err());
        assert!(parse("").unwrap().servers.is_empty());
    }
}
