//! Conversation Context
//!
//! This module holds the conversation state the engine works on.
//!
//! # Architecture
//!
//! - **Types**: Message, Role and ToolCall
//! - **History**: ordered conversation owned by one engine
//! - **Window**: token counting and budget trimming

pub mod history;
pub mod types;
pub mod window;

pub use history::ConversationHistory;
pub use types::{Message, Role, ToolCall};
pub use window::{
    create_counter, DroppedCounts, EstimatingCounter, TokenBudget, TokenCounter, TokenizerFamily,
    TrimOutcome, DEFAULT_RESERVE_TOKENS,
};
