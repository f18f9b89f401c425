pub mod budget;
pub mod token_counter;

pub use budget::{DroppedCounts, TokenBudget, TrimOutcome, DEFAULT_RESERVE_TOKENS};
pub use token_counter::{create_counter, EstimatingCounter, TokenCounter, TokenizerFamily};
