//! The request/respond/tool-call loop.

use super::dispatcher::ToolCallDispatcher;
use crate::config::AgentConfig;
use crate::context::{ConversationHistory, Message, TokenBudget, ToolCall};
use crate::llm::{ModelError, ModelProvider, ModelRequest, ModelResponse};
use crate::plugin::PluginManager;
use crate::telemetry::{SessionSnapshot, SessionState};
use crate::tools::{ToolDescriptor, ToolRegistry};
use crate::{AgentError, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Assistant text committed when the model returns nothing at all
pub const EMPTY_REPLY: &str = "[No content or tool calls received]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EngineState {
    Idle,
    AwaitingModel,
    ExecutingTools,
    /// The last query hit a hard limit; the next query starts fresh
    Aborted,
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub max_context_tokens: usize,
    pub max_iterations: usize,
    pub model_timeout: Duration,
    pub model_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::from(&AgentConfig::default())
    }
}

impl From<&AgentConfig> for EngineOptions {
    fn from(cfg: &AgentConfig) -> Self {
        Self {
            max_context_tokens: cfg.max_context_tokens,
            max_iterations: cfg.max_iterations,
            model_timeout: cfg.model_timeout(),
            model_retries: cfg.model_retries,
            retry_backoff: cfg.model_retry_backoff(),
        }
    }
}

/// Owns one conversation and drives it one query at a time
pub struct ConversationEngine {
    model: Arc<dyn ModelProvider>,
    dispatcher: ToolCallDispatcher,
    registry: Arc<ToolRegistry>,
    budget: TokenBudget,
    history: ConversationHistory,
    options: EngineOptions,
    state: EngineState,
    stats: Arc<SessionState>,
    plugins: PluginManager,
}

impl ConversationEngine {
    pub fn new(
        model: Arc<dyn ModelProvider>,
        dispatcher: ToolCallDispatcher,
        registry: Arc<ToolRegistry>,
        system_prompt: impl Into<String>,
        options: EngineOptions,
    ) -> Self {
        let budget = TokenBudget::for_model(model.model_name());
        Self {
            model,
            dispatcher,
            registry,
            budget,
            history: ConversationHistory::new(system_prompt),
            options,
            state: EngineState::Idle,
            stats: Arc::new(SessionState::new()),
            plugins: PluginManager::new(),
        }
    }

    pub fn with_budget(mut self, budget: TokenBudget) -> Self {
        self.budget = budget;
        self
    }

    /// Share counters with the dispatcher or a caller
    pub fn with_stats(mut self, stats: Arc<SessionState>) -> Self {
        self.stats = stats;
        self
    }

    pub fn with_plugins(mut self, plugins: PluginManager) -> Self {
        self.plugins = plugins;
        self
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn stats(&self) -> SessionSnapshot {
        self.stats.snapshot()
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
        self.state = EngineState::Idle;
        info!(target: "engine", "Conversation history cleared");
    }

    /// `Chat history: N messages, ~T tokens`
    pub fn summary(&self) -> String {
        let tokens = self.budget.count(&self.history.request_view());
        format!(
            "Chat history: {} messages, ~{} tokens",
            self.history.turns().len(),
            tokens
        )
    }

    /// Answer one query.
    ///
    /// On error the history keeps everything committed before the failure:
    /// the user message and every complete tool round. A context overflow
    /// removes the whole turn instead.
    #[instrument(skip(self, query, cancel), fields(query_len = query.len()))]
    pub async fn run_query(&mut self, query: &str, cancel: &CancellationToken) -> Result<String> {
        self.stats.record_query();
        self.plugins.query_started(query).await;

        let result = self.drive(query, cancel).await;

        self.state = match &result {
            Ok(_) => EngineState::Idle,
            Err(AgentError::ContextOverflow { .. }) | Err(AgentError::MaxIterationsExceeded(_)) => {
                EngineState::Aborted
            }
            Err(_) => EngineState::Idle,
        };

        match &result {
            Ok(answer) => self.plugins.response_ready(answer).await,
            Err(e) => {
                warn!(target: "engine", code = e.code(), error = %e, "Query failed");
                self.plugins.error_raised(e).await;
            }
        }
        result
    }

    async fn drive(&mut self, query: &str, cancel: &CancellationToken) -> Result<String> {
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }

        self.history.push_user(query);
        self.stats.record_messages(1);

        let mut rounds = 0usize;
        loop {
            self.state = EngineState::AwaitingModel;
            let tools = self.registry.schema_list();
            if let Err(e) = self.fit_history(&tools) {
                if matches!(e, AgentError::ContextOverflow { .. }) {
                    let removed = self.history.discard_live_turn();
                    debug!(target: "engine", removed, "Discarded turn that cannot fit the context window");
                }
                return Err(e);
            }

            let request = ModelRequest::new(self.history.request_view(), tools);
            let response = self.call_model(request, cancel).await?;

            let (content, calls) = match response {
                ModelResponse::Content(text) => {
                    let text = if text.trim().is_empty() {
                        EMPTY_REPLY.to_string()
                    } else {
                        text
                    };
                    self.history.push_assistant(text.clone());
                    self.stats.record_messages(1);
                    info!(target: "engine", rounds, "Query answered");
                    return Ok(text);
                }
                ModelResponse::ToolCalls { content, calls } => (content, calls),
            };

            if rounds >= self.options.max_iterations {
                return Err(AgentError::MaxIterationsExceeded(rounds));
            }

            self.state = EngineState::ExecutingTools;
            let assistant = Message::assistant_with_tools(content, unique_call_ids(calls));
            debug!(
                target: "engine",
                round = rounds + 1,
                calls = assistant.tool_calls.len(),
                "Executing tool calls"
            );

            let results = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                r = self.dispatcher.dispatch(&assistant.tool_calls) => r,
            };

            let committed = 1 + results.len() as u64;
            self.history.push_round(assistant, results)?;
            self.stats.record_messages(committed);
            rounds += 1;
        }
    }

    /// Trim the history so the next request fits beside the tool catalog
    fn fit_history(&mut self, tools: &[ToolDescriptor]) -> Result<()> {
        let max = self
            .options
            .max_context_tokens
            .saturating_sub(self.budget.schema_tokens(tools));
        let count = self.budget.count(&self.history.request_view());
        if !self.budget.should_trim(count, max) {
            return Ok(());
        }

        let outcome =
            self.budget
                .trim_with_prior(self.history.messages(), self.history.dropped(), max)?;
        debug!(
            target: "engine",
            before = count,
            dropped = outcome.dropped.total(),
            "Trimming history to fit the context window"
        );
        self.history.apply_trim(outcome)
    }

    async fn call_model(
        &self,
        request: ModelRequest,
        cancel: &CancellationToken,
    ) -> Result<ModelResponse> {
        let mut retries = 0u32;
        loop {
            self.stats.record_model_call();
            let call = timeout(self.options.model_timeout, self.model.complete(request.clone()));
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                r = call => r,
            };

            let err = match outcome {
                Err(_) => return Err(ModelError::Timeout(self.options.model_timeout).into()),
                Ok(Ok(response)) => return Ok(response),
                Ok(Err(e)) => e,
            };

            if !err.is_transient() || retries >= self.options.model_retries {
                return Err(err.into());
            }
            retries += 1;
            let delay = self
                .options
                .retry_backoff
                .saturating_mul(1u32 << (retries - 1).min(8));
            warn!(
                target: "engine",
                attempt = retries,
                max_retries = self.options.model_retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Transient model error, retrying"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Give every call a distinct id; some models repeat or omit them
fn unique_call_ids(mut calls: Vec<ToolCall>) -> Vec<ToolCall> {
    let mut seen = HashSet::new();
    for (i, call) in calls.iter_mut().enumerate() {
        if call.id.is_empty() || !seen.insert(call.id.clone()) {
            let mut n = i;
            loop {
                let candidate = format!("call_{n}");
                if seen.insert(candidate.clone()) {
                    call.id = candidate;
                    break;
                }
                n += 1;
            }
        }
    }
    calls
}
