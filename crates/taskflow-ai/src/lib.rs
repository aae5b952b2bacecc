//! Streaming LLM provider implementations and the conversation-summarization
//! half of context compaction. The storage-mutating half of compaction
//! (replacing a session's message history with a summary) lives in
//! `taskflow-core`; this crate only ever turns messages into a summary
//! string through an `LlmProvider`, never touching storage.

pub mod compaction;
pub mod error;
pub mod llm;

pub use error::{AiError, Result};
pub use llm::{AnthropicProvider, MockProvider, RetryingProvider};
