//! Token Budget
//!
//! Counts a message sequence and trims the oldest turns when the sequence no
//! longer fits the model's context window.

use crate::context::types::{Message, Role};
use crate::context::window::token_counter::{create_counter, TokenCounter};
use crate::tools::ToolDescriptor;
use crate::{AgentError, Result};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

/// Tokens held back for the model's response
pub const DEFAULT_RESERVE_TOKENS: usize = 1000;

/// Per-message framing overhead
const MESSAGE_OVERHEAD: usize = 4;

/// Reply priming added once per request
const REPLY_PRIMING: usize = 2;

/// Messages removed by trimming, by role
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DroppedCounts {
    pub user: usize,
    pub assistant: usize,
    pub tool: usize,
    pub system: usize,
}

impl DroppedCounts {
    pub fn total(&self) -> usize {
        self.user + self.assistant + self.tool + self.system
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    fn record(&mut self, role: Role) {
        match role {
            Role::User => self.user += 1,
            Role::Assistant => self.assistant += 1,
            Role::Tool => self.tool += 1,
            Role::System => self.system += 1,
        }
    }

    pub fn merge(self, other: DroppedCounts) -> DroppedCounts {
        DroppedCounts {
            user: self.user + other.user,
            assistant: self.assistant + other.assistant,
            tool: self.tool + other.tool,
            system: self.system + other.system,
        }
    }

    /// Human-readable note for the model, `None` when nothing was dropped
    pub fn note(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        Some(format!(
            "[Note: {} earlier messages trimmed ({} user, {} assistant, {} tool) to fit the context window]",
            self.total(),
            self.user,
            self.assistant,
            self.tool
        ))
    }
}

/// Result of a trim pass
#[derive(Debug, Clone)]
pub struct TrimOutcome {
    /// Surviving messages, system message first, without the note
    pub messages: Vec<Message>,
    /// What this pass removed
    pub dropped: DroppedCounts,
    /// Note covering everything dropped so far, including earlier passes
    pub note: Option<String>,
}

/// Counts and trims conversation history against a context window
#[derive(Clone)]
pub struct TokenBudget {
    counter: Arc<dyn TokenCounter>,
    reserve: usize,
}

impl TokenBudget {
    pub fn new(counter: Arc<dyn TokenCounter>, reserve: usize) -> Self {
        Self { counter, reserve }
    }

    /// Budget using the estimator for `model` and the default reserve
    pub fn for_model(model: &str) -> Self {
        Self::new(create_counter(model), DEFAULT_RESERVE_TOKENS)
    }

    pub fn with_reserve(mut self, reserve: usize) -> Self {
        self.reserve = reserve;
        self
    }

    pub fn reserve(&self) -> usize {
        self.reserve
    }

    /// Tokens usable for the prompt once the reserve is held back
    pub fn available(&self, max_tokens: usize) -> usize {
        max_tokens.saturating_sub(self.reserve)
    }

    pub fn count_message(&self, message: &Message) -> usize {
        let mut tokens = MESSAGE_OVERHEAD;
        if let Some(content) = message.content.as_deref() {
            tokens += self.counter.count_text(content);
        }
        if message.has_tool_calls() {
            let calls: Vec<_> = message
                .tool_calls
                .iter()
                .map(|c| json!({"id": c.id, "name": c.name, "arguments": c.arguments}))
                .collect();
            tokens += self.counter.count_json(&json!(calls));
        }
        if let Some(name) = message.name.as_deref() {
            tokens += self.counter.count_text(name);
        }
        tokens
    }

    /// Token count of a full request made of `history`
    pub fn count(&self, history: &[Message]) -> usize {
        history.iter().map(|m| self.count_message(m)).sum::<usize>() + REPLY_PRIMING
    }

    /// Estimated cost of presenting the tool catalog to the model
    pub fn schema_tokens(&self, tools: &[ToolDescriptor]) -> usize {
        tools
            .iter()
            .map(|t| self.counter.count_json(&t.to_function_schema()))
            .sum()
    }

    pub fn should_trim(&self, count: usize, max_tokens: usize) -> bool {
        count > self.available(max_tokens)
    }

    /// Trim `history` to fit `max_tokens`, see [`TokenBudget::trim_with_prior`]
    pub fn trim(&self, history: &[Message], max_tokens: usize) -> Result<TrimOutcome> {
        self.trim_with_prior(history, DroppedCounts::default(), max_tokens)
    }

    /// Drop the oldest messages between the system message and the latest
    /// user message until the rest, plus the trim note, fits.
    ///
    /// An assistant message is dropped together with the tool results that
    /// answer it. `prior` holds counts from earlier passes so the note stays
    /// cumulative. Fails with `ContextOverflow` when the system message and
    /// the live turn alone do not fit.
    pub fn trim_with_prior(
        &self,
        history: &[Message],
        prior: DroppedCounts,
        max_tokens: usize,
    ) -> Result<TrimOutcome> {
        let target = self.available(max_tokens);
        let head = match history.first() {
            Some(m) if m.role == Role::System => 1,
            _ => 0,
        };
        let live_start = history
            .iter()
            .rposition(|m| m.role == Role::User)
            .unwrap_or(history.len())
            .max(head);

        let costs: Vec<usize> = history.iter().map(|m| self.count_message(m)).collect();
        let fixed: usize = costs[..head].iter().sum::<usize>()
            + costs[live_start..].iter().sum::<usize>()
            + REPLY_PRIMING;
        let mut removable: usize = costs[head..live_start].iter().sum();

        let note_cost = |dropped: DroppedCounts| -> usize {
            prior
                .merge(dropped)
                .note()
                .map(|n| self.count_message(&Message::system(n)))
                .unwrap_or(0)
        };

        let mut dropped = DroppedCounts::default();
        let mut cut = head;
        while fixed + removable + note_cost(dropped) > target {
            if cut >= live_start {
                let required = fixed + note_cost(dropped);
                debug!(
                    target: "token_budget",
                    required,
                    available = target,
                    "Live turn exceeds the context window"
                );
                return Err(AgentError::ContextOverflow {
                    required,
                    available: target,
                });
            }
            // Drop one message, then any tool results it leaves orphaned
            dropped.record(history[cut].role);
            removable -= costs[cut];
            cut += 1;
            while cut < live_start && history[cut].role == Role::Tool {
                dropped.record(Role::Tool);
                removable -= costs[cut];
                cut += 1;
            }
        }

        let mut messages = Vec::with_capacity(history.len() - (cut - head));
        messages.extend_from_slice(&history[..head]);
        messages.extend_from_slice(&history[cut..]);

        if !dropped.is_empty() {
            debug!(
                target: "token_budget",
                dropped = dropped.total(),
                remaining = messages.len(),
                "Trimmed conversation history"
            );
        }

        Ok(TrimOutcome {
            messages,
            dropped,
            note: prior.merge(dropped).note(),
        })
    }
}
