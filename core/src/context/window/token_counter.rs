//! Token Counting
//!
//! Deterministic token estimation for context window budgeting.

use std::sync::Arc;

/// Token counting interface for different model families
pub trait TokenCounter: Send + Sync {
    /// Count tokens in text
    fn count_text(&self, text: &str) -> usize;

    /// Estimate tokens for JSON content (conservative estimate)
    fn count_json(&self, json: &serde_json::Value) -> usize {
        self.count_text(&json.to_string())
    }
}

/// Model tokenizer family, picked from the model identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenizerFamily {
    /// gpt-4o / o-series style vocabularies
    O200k,
    /// gpt-4 / gpt-3.5 style vocabularies
    Cl100k,
    /// Anything else: assume a denser tokenizer
    Generic,
}

impl TokenizerFamily {
    pub fn for_model(model: &str) -> Self {
        let m = model.to_lowercase();
        if m.contains("gpt-4o") || m.contains("gpt-4.1") || m.contains("o200k") {
            TokenizerFamily::O200k
        } else if m.contains("gpt-4") || m.contains("gpt-3.5") {
            TokenizerFamily::Cl100k
        } else {
            TokenizerFamily::Generic
        }
    }

    fn chars_per_token(self) -> f32 {
        match self {
            TokenizerFamily::O200k | TokenizerFamily::Cl100k => 4.0,
            TokenizerFamily::Generic => 3.5,
        }
    }
}

/// Character-ratio estimator.
///
/// Bytes are divided by the family's chars-per-token ratio and a 10% buffer
/// is added for special tokens. The same input always yields the same count.
pub struct EstimatingCounter {
    family: TokenizerFamily,
}

impl EstimatingCounter {
    pub fn new(family: TokenizerFamily) -> Self {
        Self { family }
    }

    pub fn for_model(model: &str) -> Self {
        Self::new(TokenizerFamily::for_model(model))
    }

    pub fn family(&self) -> TokenizerFamily {
        self.family
    }

    fn estimate(len: usize, ratio: f32) -> usize {
        let base_estimate = (len as f32 / ratio).ceil() as usize;
        base_estimate + (base_estimate / 10)
    }
}

impl TokenCounter for EstimatingCounter {
    fn count_text(&self, text: &str) -> usize {
        Self::estimate(text.len(), self.family.chars_per_token())
    }

    fn count_json(&self, json: &serde_json::Value) -> usize {
        // JSON has more overhead (brackets, quotes, etc.)
        Self::estimate(json.to_string().len(), 3.0)
    }
}

/// Create a shared token counter for a model
pub fn create_counter(model: &str) -> Arc<dyn TokenCounter> {
    Arc::new(EstimatingCounter::for_model(model))
}
