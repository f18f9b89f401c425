//! Conversation history owned by a single engine.

use crate::context::types::{Message, Role};
use crate::context::window::{DroppedCounts, TrimOutcome};
use crate::{AgentError, Result};
use std::collections::HashSet;

/// Ordered message history. Always starts with exactly one system message.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    messages: Vec<Message>,
    dropped: DroppedCounts,
}

impl ConversationHistory {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(system_prompt)],
            dropped: DroppedCounts::default(),
        }
    }

    pub fn system(&self) -> &Message {
        &self.messages[0]
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        // The system message is always present
        false
    }

    /// Messages after the system prompt
    pub fn turns(&self) -> &[Message] {
        &self.messages[1..]
    }

    /// Everything trimmed away so far
    pub fn dropped(&self) -> DroppedCounts {
        self.dropped
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(Message::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.messages.push(Message::assistant(content));
    }

    /// Commit one tool-calling round: the assistant turn and every result.
    ///
    /// Results must answer the assistant's calls one-to-one and in order;
    /// nothing is appended otherwise.
    pub fn push_round(&mut self, assistant: Message, results: Vec<Message>) -> Result<()> {
        if assistant.role != Role::Assistant || !assistant.has_tool_calls() {
            return Err(AgentError::Protocol(
                "tool round must start with an assistant message carrying tool calls".into(),
            ));
        }
        if results.len() != assistant.tool_calls.len() {
            return Err(AgentError::Protocol(format!(
                "{} tool calls but {} tool results",
                assistant.tool_calls.len(),
                results.len()
            )));
        }
        for (call, result) in assistant.tool_calls.iter().zip(&results) {
            if result.role != Role::Tool || result.tool_call_id.as_deref() != Some(call.id.as_str()) {
                return Err(AgentError::Protocol(format!(
                    "tool result does not answer call {}",
                    call.id
                )));
            }
        }
        self.messages.push(assistant);
        self.messages.extend(results);
        Ok(())
    }

    /// Messages as sent to the model: the system prompt, the trim note (if
    /// anything was trimmed) as a second system message, then the turns.
    pub fn request_view(&self) -> Vec<Message> {
        let mut view = Vec::with_capacity(self.messages.len() + 1);
        view.push(self.messages[0].clone());
        if let Some(note) = self.dropped.note() {
            view.push(Message::system(note));
        }
        view.extend_from_slice(&self.messages[1..]);
        view
    }

    /// Replace the history with a trimmed version of itself
    pub fn apply_trim(&mut self, outcome: TrimOutcome) -> Result<()> {
        match outcome.messages.first() {
            Some(m) if m == &self.messages[0] => {}
            _ => {
                return Err(AgentError::Protocol(
                    "trimmed history lost the system message".into(),
                ))
            }
        }
        self.messages = outcome.messages;
        self.dropped = self.dropped.merge(outcome.dropped);
        Ok(())
    }

    /// Remove the most recent user message and everything after it.
    /// Returns how many messages were removed.
    pub fn discard_live_turn(&mut self) -> usize {
        match self.messages.iter().rposition(|m| m.role == Role::User) {
            Some(idx) => {
                let removed = self.messages.len() - idx;
                self.messages.truncate(idx);
                removed
            }
            None => 0,
        }
    }

    /// Drop every turn, keeping the system prompt
    pub fn clear(&mut self) {
        self.messages.truncate(1);
        self.dropped = DroppedCounts::default();
    }

    /// Check the structural invariants of the history
    pub fn validate(&self) -> Result<()> {
        if self.messages.first().map(|m| m.role) != Some(Role::System) {
            return Err(AgentError::Protocol("history must start with a system message".into()));
        }
        if self.messages[1..].iter().any(|m| m.role == Role::System) {
            return Err(AgentError::Protocol("history holds more than one system message".into()));
        }

        let mut open_calls: HashSet<&str> = HashSet::new();
        for msg in &self.messages[1..] {
            match msg.role {
                Role::Tool => {
                    let id = msg.tool_call_id.as_deref().unwrap_or("");
                    if !open_calls.remove(id) {
                        return Err(AgentError::Protocol(format!(
                            "tool message {id:?} does not answer the preceding assistant turn"
                        )));
                    }
                }
                Role::Assistant => {
                    open_calls = msg.tool_calls.iter().map(|c| c.id.as_str()).collect();
                }
                _ => open_calls.clear(),
            }
        }
        Ok(())
    }
}
