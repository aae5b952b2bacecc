//! LLM provider abstraction (the API Caller's collaborator seam).
//!
//! `LlmProvider` decouples the agentic loop from any concrete vendor SDK;
//! `taskflow-ai` implements it once per backend and wraps any of them in
//! the rate-limit-retrying decorator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, ToolError};
use crate::tool::ToolSchema;

/// Fixed retry delay schedule for rate-limited completions: up to 5
/// retries at these delays, in order.
pub const RATE_LIMIT_RETRY_DELAYS_MS: [u64; 5] = [2_000, 4_000, 8_000, 16_000, 30_000];

/// A single block of assembled completion content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ToolUse { id: String, name: String, input: Value },
}

/// Why the provider stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
}

/// Token accounting for a single completion.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// A chunk streamed back to an optional caller-supplied callback while a
/// completion is in flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamChunk {
    Text { text: String },
    ToolUse { id: String, name: String, input: Value },
    Done { stop_reason: Option<StopReason> },
}

/// A message in provider wire format: the `system` role has already been
/// dropped by the caller before this point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiMessage {
    pub role: String,
    pub content: Value,
}

/// A single completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub messages: Vec<ApiMessage>,
    pub tools: Vec<ToolSchema>,
    pub model: String,
    pub max_tokens: u32,
}

/// The assembled result of consuming a completion stream to its end.
#[derive(Debug, Clone)]
pub struct CompletionResult {
    pub content: Vec<ContentBlock>,
    pub stop_reason: Option<StopReason>,
    pub usage: Usage,
}

/// Type of an optional per-chunk stream callback.
pub type StreamCallback = Box<dyn Fn(&StreamChunk) + Send + Sync>;

/// Translates a `(system prompt, messages, tools)` request into a streaming
/// provider call and assembles the stream into a final result.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// The provider's declared default model, substituted for the literal
    /// `default`.
    fn default_model(&self) -> &str;

    async fn complete(
        &self,
        request: CompletionRequest,
        on_chunk: Option<&StreamCallback>,
    ) -> std::result::Result<CompletionResult, ToolError>;
}

/// Whether an error status/message indicates a rate-limited request, per
/// the API Caller's detection rule (HTTP 429 or a message substring match).
pub fn is_rate_limit_error(status: Option<u16>, message: &str) -> bool {
    if status == Some(429) {
        return true;
    }
    let lower = message.to_ascii_lowercase();
    lower.contains("429") || lower.contains("rate limit") || lower.contains("overloaded")
}

pub type LlmResult<T> = Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_429_status() {
        assert!(is_rate_limit_error(Some(429), "anything"));
    }

    #[test]
    fn detects_rate_limit_message_case_insensitive() {
        assert!(is_rate_limit_error(None, "Error: Rate Limit exceeded"));
        assert!(is_rate_limit_error(None, "the API is OVERLOADED"));
        assert!(!is_rate_limit_error(None, "invalid api key"));
    }

    #[test]
    fn retry_schedule_has_five_delays() {
        assert_eq!(RATE_LIMIT_RETRY_DELAYS_MS.len(), 5);
        assert_eq!(RATE_LIMIT_RETRY_DELAYS_MS[0], 2_000);
        assert_eq!(RATE_LIMIT_RETRY_DELAYS_MS[4], 30_000);
    }
}
