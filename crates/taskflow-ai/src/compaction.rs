//! Conversation summarization: turns a message transcript into a single
//! summary string through an `LlmProvider`. Pure — never touches storage;
//! replacing a session's history with the returned summary is the caller's
//! job (the context store decides when to call this and what to do with
//! the result).

use serde_json::json;
use taskflow_traits::error::ToolError;
use taskflow_traits::llm::{ApiMessage, CompletionRequest, ContentBlock, LlmProvider};

const SUMMARIZATION_SYSTEM_PROMPT: &str = "Summarize the following conversation concisely, \
preserving decisions, open questions, and any state needed to continue the work. Do not \
add commentary outside the summary itself.";

const MIN_MESSAGES_TO_COMPACT: usize = 4;
const SUMMARY_MAX_TOKENS: u32 = 2000;

/// One line of transcript, already flattened to plain text by the caller.
pub struct TranscriptLine {
    pub role: String,
    pub content: String,
}

/// `needsCompaction ⇔ U > W·T`.
pub fn needs_compaction(effective_window: u64, threshold: f64, used_tokens: u64) -> bool {
    (used_tokens as f64) > (effective_window as f64) * threshold
}

/// `atLimit ⇔ U > W·0.98` — the hard guard even a too-long summary must fit
/// under on the next call.
pub fn at_limit(effective_window: u64, used_tokens: u64) -> bool {
    (used_tokens as f64) > (effective_window as f64) * 0.98
}

/// Summarizes `messages` via `provider`. Returns `Ok(None)` (a no-op) when
/// there are fewer than four messages, per policy — compacting a handful of
/// messages loses more fidelity than it saves.
pub async fn summarize(
    provider: &dyn LlmProvider,
    model: &str,
    messages: &[TranscriptLine],
) -> std::result::Result<Option<String>, ToolError> {
    if messages.len() < MIN_MESSAGES_TO_COMPACT {
        return Ok(None);
    }

    let transcript = messages
        .iter()
        .map(|m| format!("{}: {}", m.role.to_ascii_uppercase(), m.content))
        .collect::<Vec<_>>()
        .join("\n");

    let request = CompletionRequest {
        system_prompt: SUMMARIZATION_SYSTEM_PROMPT.to_string(),
        messages: vec![ApiMessage {
            role: "user".to_string(),
            content: json!(transcript),
        }],
        tools: vec![],
        model: model.to_string(),
        max_tokens: SUMMARY_MAX_TOKENS,
    };

    let result = provider.complete(request, None).await?;
    let summary = result
        .content
        .into_iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text),
            ContentBlock::ToolUse { .. } => None,
        })
        .collect::<Vec<_>>()
        .join("\n");

    Ok(Some(summary))
}

/// Formats the summary into the system message appended after compaction.
pub fn summary_message(summary: &str) -> String {
    format!("[Previous conversation summary]\n\n{summary}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockProvider;
    use taskflow_traits::llm::{CompletionResult, StopReason, Usage};

    fn line(role: &str, content: &str) -> TranscriptLine {
        TranscriptLine {
            role: role.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn needs_compaction_trips_above_threshold() {
        assert!(needs_compaction(180_000, 0.8, 144_001));
        assert!(!needs_compaction(180_000, 0.8, 144_000));
    }

    #[test]
    fn at_limit_trips_above_ninety_eight_percent() {
        assert!(at_limit(180_000, 176_401));
        assert!(!at_limit(180_000, 176_400));
    }

    #[tokio::test]
    async fn short_transcripts_are_a_no_op() {
        let provider = MockProvider::new(vec![]);
        let messages = vec![line("user", "hi"), line("assistant", "hello")];
        let result = summarize(&provider, "default", &messages).await.unwrap();
        assert!(result.is_none());
        assert!(provider.seen_requests().is_empty());
    }

    #[tokio::test]
    async fn long_transcripts_call_the_provider_and_return_its_text() {
        let provider = MockProvider::new(vec![CompletionResult {
            content: vec![ContentBlock::Text {
                text: "condensed summary".to_string(),
            }],
            stop_reason: Some(StopReason::EndTurn),
            usage: Usage::default(),
        }]);
        let messages = vec![
            line("user", "one"),
            line("assistant", "two"),
            line("user", "three"),
            line("assistant", "four"),
        ];
        let result = summarize(&provider, "default", &messages).await.unwrap();
        assert_eq!(result.as_deref(), Some("condensed summary"));
        let sent = provider.seen_requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].max_tokens, SUMMARY_MAX_TOKENS);
    }

    #[test]
    fn summary_message_uses_the_fixed_framing() {
        let framed = summary_message("abc");
        assert_eq!(framed, "[Previous conversation summary]\n\nabc");
    }
}
