//! Agent orchestration split into smaller files for readability.
//! - dispatcher.rs: runs one turn's tool calls against the sessions
//! - engine.rs: ConversationEngine, the request/respond/tool-call loop
//! - facade.rs: Agent, wiring everything from config plus the interactive loop
//! - prompt.rs: built-in system prompt

mod dispatcher;
mod engine;
mod facade;
mod prompt;

pub use dispatcher::{parse_arguments, ToolCallDispatcher, NO_CONTENT, TOOL_NOT_FOUND};
pub use engine::{ConversationEngine, EngineOptions, EngineState, EMPTY_REPLY};
pub use facade::{Agent, Command};
pub use prompt::DEFAULT_SYSTEM_PROMPT;
