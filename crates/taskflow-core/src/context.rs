//! Session and message storage, compaction triggering, and the
//! delete-then-summarize mutation performed once a provider has produced
//! a summary. The summarization text itself comes from
//! `taskflow_ai::compaction::summarize`.

use std::sync::Arc;

use serde_json::{Value, json};
use taskflow_ai::compaction;
use taskflow_contracts::message::{ContentBlock, Message, MessageContent, MessageRole};
use taskflow_contracts::session::Session;
use taskflow_traits::error::{Result, ToolError};
use taskflow_traits::event::EventBus;
use taskflow_traits::llm::LlmProvider;
use taskflow_traits::store::{ChainValidity, MessageCreate, MessageStore, SessionStore, SessionUpdate};

/// Result of `build`: current messages plus derived totals.
pub struct BuildResult {
    pub session: Session,
    pub messages: Vec<Message>,
    pub token_sum: u64,
    pub compaction_count: u32,
}

pub struct ContextStore {
    sessions: Arc<dyn SessionStore>,
    messages: Arc<dyn MessageStore>,
    events: Arc<dyn EventBus>,
}

impl ContextStore {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        messages: Arc<dyn MessageStore>,
        events: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            sessions,
            messages,
            events,
        }
    }

    fn now_ms() -> i64 {
        taskflow_storage::now_ms()
    }

    /// `build(sessionId)`: creates the session with defaults if missing.
    pub async fn build(&self, session_id: &str) -> Result<BuildResult> {
        let session = match self.sessions.get(session_id).await? {
            Some(session) => session,
            None => {
                self.sessions
                    .create(Session::new(session_id, Self::now_ms()))
                    .await?
            }
        };
        let messages = self.messages.list(session_id).await?;
        let token_sum = self.messages.get_token_count(session_id).await?;
        Ok(BuildResult {
            compaction_count: session.compaction_count,
            session,
            messages,
            token_sum,
        })
    }

    pub async fn add_message(
        &self,
        session_id: &str,
        role: MessageRole,
        content: MessageContent,
        parent_id: Option<String>,
        tokens: Option<u32>,
    ) -> Result<Message> {
        let message = self
            .messages
            .create(
                session_id,
                MessageCreate {
                    parent_id,
                    role,
                    content,
                    created_at: Self::now_ms(),
                    token_count: tokens,
                },
            )
            .await?;
        self.sessions
            .update(
                session_id,
                SessionUpdate {
                    last_activity_at: Some(Self::now_ms()),
                    ..Default::default()
                },
            )
            .await?;
        Ok(message)
    }

    pub async fn get_token_count(&self, session_id: &str) -> Result<u64> {
        self.messages.get_token_count(session_id).await
    }

    /// Adds `delta` to the session's cumulative token counter and bumps
    /// `last_activity_at`. Called by the agentic loop's FINALIZE step.
    pub async fn accumulate_tokens(&self, session_id: &str, delta: u64) -> Result<()> {
        let session = self
            .sessions
            .get(session_id)
            .await?
            .ok_or_else(|| ToolError::NotFound(session_id.to_string()))?;
        self.sessions
            .update(
                session_id,
                SessionUpdate {
                    last_activity_at: Some(Self::now_ms()),
                    total_tokens: Some(session.total_tokens + delta),
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }

    pub async fn validate_chain(&self, session_id: &str) -> Result<ChainValidity> {
        self.messages.validate_chain(session_id).await
    }

    pub fn needs_compaction(&self, effective_window: u64, threshold: f64, used_tokens: u64) -> bool {
        compaction::needs_compaction(effective_window, threshold, used_tokens)
    }

    pub fn at_limit(&self, effective_window: u64, used_tokens: u64) -> bool {
        compaction::at_limit(effective_window, used_tokens)
    }

    /// Compacts `session_id`'s message history via `provider`. No-op (per
    /// policy) when there are fewer than four messages. On success, emits
    /// `session:compact{before, after}` and increments the session's
    /// compaction count.
    pub async fn compact(
        &self,
        session_id: &str,
        provider: &dyn LlmProvider,
        model: &str,
    ) -> Result<bool> {
        let messages = self.messages.list(session_id).await?;
        let before = messages.len();

        let lines: Vec<compaction::TranscriptLine> = messages
            .iter()
            .map(|m| compaction::TranscriptLine {
                role: role_label(m.role).to_string(),
                content: flatten_content(&m.content),
            })
            .collect();

        let summary = match compaction::summarize(provider, model, &lines).await? {
            Some(summary) => summary,
            None => return Ok(false),
        };

        self.messages.delete_session(session_id).await?;

        let summary_message = self
            .messages
            .create(
                session_id,
                MessageCreate {
                    parent_id: None,
                    role: MessageRole::System,
                    content: MessageContent::Text(compaction::summary_message(&summary)),
                    created_at: Self::now_ms(),
                    token_count: None,
                },
            )
            .await?;

        let session = self
            .sessions
            .get(session_id)
            .await?
            .ok_or_else(|| ToolError::NotFound(session_id.to_string()))?;
        self.sessions
            .update(
                session_id,
                SessionUpdate {
                    compaction_count: Some(session.compaction_count + 1),
                    ..Default::default()
                },
            )
            .await?;

        self.events
            .emit(
                "session:compact",
                json!({
                    "sessionId": session_id,
                    "before": before,
                    "after": 1,
                    "summaryMessageId": summary_message.id,
                }),
            )
            .await;

        Ok(true)
    }
}

fn role_label(role: MessageRole) -> &'static str {
    match role {
        MessageRole::User => "USER",
        MessageRole::Assistant => "ASSISTANT",
        MessageRole::System => "SYSTEM",
    }
}

fn flatten_content(content: &MessageContent) -> String {
    match content {
        MessageContent::Text(text) => text.clone(),
        MessageContent::Blocks(blocks) => blocks
            .iter()
            .map(block_to_text)
            .collect::<Vec<_>>()
            .join(" "),
    }
}

fn block_to_text(block: &ContentBlock) -> String {
    match block {
        ContentBlock::Text { text } => text.clone(),
        ContentBlock::ToolUse { name, input, .. } => format!("[tool_use {name} {input}]"),
        ContentBlock::ToolResult { content, is_error, .. } => {
            if *is_error {
                format!("[tool_error {content}]")
            } else {
                format!("[tool_result {content}]")
            }
        }
    }
}

/// Converts a message's content into the API-facing JSON value shape,
/// used when the loop translates stored messages into provider messages.
pub fn content_to_value(content: &MessageContent) -> Value {
    match content {
        MessageContent::Text(text) => json!(text),
        MessageContent::Blocks(blocks) => json!(blocks),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use taskflow_ai::llm::MockProvider;

    // Bring in redb-backed stores and the in-process bus for integration-style tests.
    use crate::event_bus::InProcessEventBus;
    use taskflow_storage::Storage;

    fn open_storage() -> Storage {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ctx.redb");
        std::mem::forget(dir);
        Storage::open(path.to_str().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn build_creates_session_lazily() {
        let storage = open_storage();
        let bus = Arc::new(InProcessEventBus::new());
        let ctx = ContextStore::new(storage.sessions.clone(), storage.messages.clone(), bus);
        let result = ctx.build("s1").await.unwrap();
        assert_eq!(result.session.id, "s1");
        assert!(result.messages.is_empty());
        assert_eq!(result.token_sum, 0);
    }

    #[tokio::test]
    async fn add_message_updates_session_activity() {
        let storage = open_storage();
        let bus = Arc::new(InProcessEventBus::new());
        let ctx = ContextStore::new(storage.sessions.clone(), storage.messages.clone(), bus);
        ctx.build("s1").await.unwrap();
        let message = ctx
            .add_message(
                "s1",
                MessageRole::User,
                MessageContent::Text("hi".to_string()),
                None,
                Some(3),
            )
            .await
            .unwrap();
        assert_eq!(message.session_id, "s1");
        assert_eq!(ctx.get_token_count("s1").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn compact_replaces_history_with_summary_with_null_parent() {
        let storage = open_storage();
        let bus = Arc::new(InProcessEventBus::new());
        let ctx = ContextStore::new(storage.sessions.clone(), storage.messages.clone(), bus);
        ctx.build("s1").await.unwrap();
        for i in 0..5 {
            ctx.add_message(
                "s1",
                if i % 2 == 0 {
                    MessageRole::User
                } else {
                    MessageRole::Assistant
                },
                MessageContent::Text(format!("message {i}")),
                None,
                Some(10),
            )
            .await
            .unwrap();
        }

        let provider = MockProvider::new(vec![compaction_stub_result("condensed")]);
        let compacted = ctx.compact("s1", &provider, "default").await.unwrap();
        assert!(compacted);

        let messages = storage.messages.list("s1").await.unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].parent_id.is_none());
        match &messages[0].content {
            MessageContent::Text(text) => assert!(text.contains("condensed")),
            _ => panic!("expected text content"),
        }

        let next = ctx
            .add_message(
                "s1",
                MessageRole::User,
                MessageContent::Text("continuing".to_string()),
                Some(messages[0].id.clone()),
                None,
            )
            .await
            .unwrap();
        assert_eq!(next.parent_id.as_deref(), Some(messages[0].id.as_str()));

        let validity = ctx.validate_chain("s1").await.unwrap();
        assert!(validity.valid);
    }

    #[tokio::test]
    async fn short_histories_are_not_compacted() {
        let storage = open_storage();
        let bus = Arc::new(InProcessEventBus::new());
        let ctx = ContextStore::new(storage.sessions.clone(), storage.messages.clone(), bus);
        ctx.build("s1").await.unwrap();
        ctx.add_message(
            "s1",
            MessageRole::User,
            MessageContent::Text("hi".to_string()),
            None,
            None,
        )
        .await
        .unwrap();

        let provider = MockProvider::new(vec![]);
        let compacted = ctx.compact("s1", &provider, "default").await.unwrap();
        assert!(!compacted);
    }

    fn compaction_stub_result(text: &str) -> taskflow_traits::llm::CompletionResult {
        taskflow_traits::llm::CompletionResult {
            content: vec![taskflow_traits::llm::ContentBlock::Text {
                text: text.to_string(),
            }],
            stop_reason: Some(taskflow_traits::llm::StopReason::EndTurn),
            usage: taskflow_traits::llm::Usage::default(),
        }
    }
}
