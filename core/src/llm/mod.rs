//! LLM module: model provider seam and the OpenAI-compatible client
//!
//! This module provides:
//! - `ModelProvider`, `ModelRequest`, `ModelResponse`, `ModelError`: the boundary the engine calls
//! - `OpenAiClient`, `LlmClientConfig`: Chat Completions over reqwest

mod client;
mod provider;

pub use client::{parse_chat_response, LlmClientConfig, OpenAiClient};
pub use provider::{ModelError, ModelProvider, ModelRequest, ModelResponse};
