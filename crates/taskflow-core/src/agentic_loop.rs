//! Agentic Loop: the per-turn state machine that alternates model
//! calls and tool execution until the provider signals an end to the turn.
//!
//! Grounded on `restflow-ai::agent::executor::{mod,tool_exec}`'s ReAct
//! loop shape (call the model, partition the response into text/tool_use,
//! run tools, append results, repeat), trimmed to this loop's own
//! ten-step ITERATE contract and its own INIT/FINALIZE framing rather than
//! the source's much larger `AgentExecutor` (workspace-context injection,
//! steer channels, stuck detection, model routing — none of which this
//! loop needs).

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tracing::info;

use taskflow_contracts::message::{ContentBlock as StoredBlock, Message, MessageContent, MessageRole};
use taskflow_traits::archival::{NoopArchivalSink, TurnArchivalSink};
use taskflow_traits::error::Result;
use taskflow_traits::event::EventBus;
use taskflow_traits::llm::{
    ApiMessage, CompletionRequest, ContentBlock as LlmContentBlock, LlmProvider, StopReason,
    StreamCallback, StreamChunk as ProviderChunk, Usage,
};
use taskflow_traits::registry::ToolRegistry;

use crate::context::ContextStore;
use crate::loader::load_project_context;
use crate::tool_executor::{ToolExecutor, ToolResultRecord, ToolUseRequest, to_content_blocks};

pub const DEFAULT_MAX_ITERATIONS: u32 = 100;
const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful autonomous agent. Use the available \
tools to complete the user's task, then respond with your final answer.";

/// Why a run stopped. Only these four are ever returned from `run`/
/// `resume` — `tool_use` is an internal per-iteration signal to keep
/// looping, never a final stop reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopStopReason {
    EndTurn,
    MaxTokens,
    Timeout,
    Interrupted,
}

/// A chunk streamed to an optional caller-supplied sink while a run is in
/// flight.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopStreamChunk {
    Text { content: String },
    ToolStart { tool_use_id: String, name: String },
    ToolInput { tool_use_id: String, input: Value },
    ToolResult { tool_use_id: String, result: String, is_error: bool },
    #[allow(dead_code)]
    Thinking { content: String },
    Done { stop_reason: Option<LoopStopReason> },
}

pub type StreamSink = Arc<dyn Fn(LoopStreamChunk) + Send + Sync>;

/// Snapshot of an agent definition the loop needs — system prompt and
/// allowed-tools list — decoupled from the loader's richer
/// `AgentDefinition` the same way `taskflow_traits::subagent::SubagentDefSnapshot`
/// decouples the registry.
#[derive(Debug, Clone, Default)]
pub struct LoopAgent {
    pub system_prompt: Option<String>,
    pub allowed_tools: Vec<String>,
}

/// Per-run configuration: session id, system prompt, tool whitelist, max
/// iterations (default 100), timeout, an optional stream sink, and the
/// agent whose prompt/tools apply; `tools`/`toolExecutors` from the original
/// design collapse into `tool_whitelist` since this implementation's tool bodies
/// are registered once in a shared `ToolRegistry`, not passed per call.
pub struct RunConfig {
    pub session_id: Option<String>,
    pub system_prompt: Option<String>,
    pub tool_whitelist: Option<Vec<String>>,
    pub max_iterations: u32,
    pub timeout_ms: Option<u64>,
    pub on_stream: Option<StreamSink>,
    pub agent: Option<LoopAgent>,
    pub model: String,
    pub max_tokens: u32,
    pub data_dir: Option<PathBuf>,
    pub effective_context_window: u64,
    pub compaction_threshold: f64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            session_id: None,
            system_prompt: None,
            tool_whitelist: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            timeout_ms: None,
            on_stream: None,
            agent: None,
            model: "default".to_string(),
            max_tokens: 8192,
            data_dir: None,
            effective_context_window: 180_000,
            compaction_threshold: 0.8,
        }
    }
}

impl RunConfig {
    /// Builds a `RunConfig` seeded from a runtime configuration's model,
    /// token budget and compaction knobs, leaving the per-run fields
    /// (session id, system prompt, agent, stream sink) at their defaults.
    pub fn from_runtime(config: &crate::config::RuntimeConfig) -> Self {
        Self {
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            data_dir: Some(PathBuf::from(&config.data_dir)),
            effective_context_window: config.effective_context_window,
            compaction_threshold: config.compaction_threshold,
            ..Self::default()
        }
    }
}

/// Result of a completed (or stopped) run.
#[derive(Debug, Clone)]
pub struct LoopResult {
    pub session_id: String,
    pub response: String,
    pub stop_reason: LoopStopReason,
    pub tokens_used: Usage,
    pub tool_calls: Vec<ToolResultRecord>,
    pub compacted: bool,
}

/// Shared interrupt flag for a single run. The caller keeps this handle
/// around (e.g. the Work Loop's running-task map, the subagent spawner's
/// timeout race) to call `interrupt()` concurrently with `run()` —
/// checked only at iteration boundaries, never force-cancelling an
/// in-flight provider stream.
#[derive(Clone, Default)]
pub struct LoopHandle {
    interrupted: Arc<AtomicBool>,
}

impl LoopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }
}

/// The agentic loop. Stateless across runs beyond its dependencies and a
/// lazily-populated AGENT.md cache; safe to share via `Arc` across
/// concurrently dispatched tasks (the Work Loop does exactly this).
pub struct AgenticLoop {
    context: Arc<ContextStore>,
    provider: Arc<dyn LlmProvider>,
    tool_registry: Arc<ToolRegistry>,
    events: Arc<dyn EventBus>,
    archival: Arc<dyn TurnArchivalSink>,
    project_context: parking_lot::Mutex<Option<Option<String>>>,
}

impl AgenticLoop {
    pub fn new(
        context: Arc<ContextStore>,
        provider: Arc<dyn LlmProvider>,
        tool_registry: Arc<ToolRegistry>,
        events: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            context,
            provider,
            tool_registry,
            events,
            archival: Arc::new(NoopArchivalSink),
            project_context: parking_lot::Mutex::new(None),
        }
    }

    pub fn with_archival(mut self, archival: Arc<dyn TurnArchivalSink>) -> Self {
        self.archival = archival;
        self
    }

    fn project_context_block(&self, data_dir: Option<&PathBuf>) -> Option<String> {
        let mut cache = self.project_context.lock();
        if let Some(cached) = cache.as_ref() {
            return cached.clone();
        }
        let computed = data_dir.and_then(|dir| load_project_context(dir));
        *cache = Some(computed.clone());
        computed
    }

    /// `run(message, config)`: starts a fresh (or explicitly named) session
    /// and drives it to completion.
    pub async fn run(&self, handle: &LoopHandle, message: &str, config: RunConfig) -> Result<LoopResult> {
        let session_id = config
            .session_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        self.run_inner(handle, &session_id, message, config).await
    }

    /// `resume(sessionId, message, config)`: `run` with the session id set
    /// explicitly, continuing the same message chain.
    pub async fn resume(
        &self,
        handle: &LoopHandle,
        session_id: &str,
        message: &str,
        config: RunConfig,
    ) -> Result<LoopResult> {
        self.run_inner(handle, session_id, message, config).await
    }

    async fn run_inner(
        &self,
        handle: &LoopHandle,
        session_id: &str,
        message: &str,
        config: RunConfig,
    ) -> Result<LoopResult> {
        let start_time = Instant::now();
        let max_tokens_window = config.effective_context_window;
        let compaction_threshold = config.compaction_threshold;

        let system_prompt = config
            .system_prompt
            .clone()
            .or_else(|| config.agent.as_ref().and_then(|a| a.system_prompt.clone()))
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
        let system_prompt = match self.project_context_block(config.data_dir.as_ref()) {
            Some(block) => format!("{system_prompt}\n\n{block}"),
            None => system_prompt,
        };

        let whitelist = config
            .tool_whitelist
            .clone()
            .or_else(|| config.agent.as_ref().map(|a| a.allowed_tools.clone()))
            .filter(|list| !list.is_empty());
        let executor = match whitelist {
            Some(list) => ToolExecutor::new(self.tool_registry.clone(), list, self.events.clone()),
            None => ToolExecutor::from_registry(self.tool_registry.clone(), self.events.clone()),
        };

        let build = self.context.build(session_id).await?;
        let mut compacted_overall = self
            .context
            .needs_compaction(max_tokens_window, compaction_threshold, build.token_sum);
        if compacted_overall {
            self.context.compact(session_id, self.provider.as_ref(), &config.model).await?;
        }

        let parent_for_user = self
            .context
            .build(session_id)
            .await?
            .messages
            .last()
            .map(|m| m.id.clone());
        self.context
            .add_message(
                session_id,
                MessageRole::User,
                MessageContent::Text(message.to_string()),
                parent_for_user,
                None,
            )
            .await?;

        let mut total_usage = Usage::default();
        let mut all_tool_calls = Vec::new();
        let mut iterations = 0u32;

        let stop_reason = loop {
            if handle.is_interrupted() {
                break LoopStopReason::Interrupted;
            }
            if let Some(timeout_ms) = config.timeout_ms
                && start_time.elapsed() > Duration::from_millis(timeout_ms)
            {
                break LoopStopReason::Timeout;
            }
            if iterations >= config.max_iterations {
                break LoopStopReason::MaxTokens;
            }

            let build = self.context.build(session_id).await?;
            if self.context.at_limit(max_tokens_window, build.token_sum) {
                self.context.compact(session_id, self.provider.as_ref(), &config.model).await?;
                compacted_overall = true;
                continue;
            }

            let api_messages = to_api_messages(&build.messages);
            let request = CompletionRequest {
                system_prompt: system_prompt.clone(),
                messages: api_messages,
                tools: self.tool_registry.schemas(),
                model: config.model.clone(),
                max_tokens: config.max_tokens,
            };

            let on_stream = config.on_stream.clone();
            let callback: Option<StreamCallback> = on_stream.clone().map(|sink| {
                let cb: StreamCallback = Box::new(move |chunk: &ProviderChunk| {
                    if let ProviderChunk::Text { text } = chunk {
                        sink(LoopStreamChunk::Text { content: text.clone() });
                    }
                });
                cb
            });
            let response = self
                .provider
                .complete(request, callback.as_ref())
                .await?;

            total_usage.input_tokens += response.usage.input_tokens;
            total_usage.output_tokens += response.usage.output_tokens;

            let last_id = build.messages.last().map(|m| m.id.clone());
            let assistant_blocks: Vec<StoredBlock> = response
                .content
                .iter()
                .map(llm_block_to_stored)
                .collect();
            self.context
                .add_message(
                    session_id,
                    MessageRole::Assistant,
                    MessageContent::Blocks(assistant_blocks),
                    last_id.clone(),
                    Some(response.usage.output_tokens as u32),
                )
                .await?;

            let (text_blocks, tool_uses): (Vec<_>, Vec<_>) = response
                .content
                .into_iter()
                .partition(|b| matches!(b, LlmContentBlock::Text { .. }));
            let final_response = text_blocks
                .into_iter()
                .filter_map(|b| match b {
                    LlmContentBlock::Text { text } => Some(text),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n");

            iterations += 1;

            if response.stop_reason != Some(StopReason::ToolUse) || tool_uses.is_empty() {
                let reason = if response.stop_reason == Some(StopReason::MaxTokens) {
                    LoopStopReason::MaxTokens
                } else {
                    LoopStopReason::EndTurn
                };
                let final_result = LoopResult {
                    session_id: session_id.to_string(),
                    response: final_response,
                    stop_reason: reason,
                    tokens_used: total_usage,
                    tool_calls: all_tool_calls,
                    compacted: compacted_overall,
                };
                return self.finalize(session_id, final_result, on_stream).await;
            }

            let requests: Vec<ToolUseRequest> = tool_uses
                .iter()
                .filter_map(|b| match b {
                    LlmContentBlock::ToolUse { id, name, input } => Some(ToolUseRequest {
                        id: id.clone(),
                        name: name.clone(),
                        input: input.clone(),
                    }),
                    _ => None,
                })
                .collect();

            if let Some(sink) = &on_stream {
                for req in &requests {
                    sink(LoopStreamChunk::ToolStart {
                        tool_use_id: req.id.clone(),
                        name: req.name.clone(),
                    });
                    sink(LoopStreamChunk::ToolInput {
                        tool_use_id: req.id.clone(),
                        input: req.input.clone(),
                    });
                }
            }

            let results = executor.execute_all(requests.clone()).await;

            if let Some(sink) = &on_stream {
                for record in &results {
                    sink(LoopStreamChunk::ToolResult {
                        tool_use_id: record.tool_use_id.clone(),
                        result: record.content.clone(),
                        is_error: record.is_error,
                    });
                }
            }

            let result_blocks = to_content_blocks(&results);
            let assistant_last = self
                .context
                .build(session_id)
                .await?
                .messages
                .last()
                .map(|m| m.id.clone());
            self.context
                .add_message(
                    session_id,
                    MessageRole::User,
                    MessageContent::Blocks(result_blocks),
                    assistant_last,
                    None,
                )
                .await?;

            all_tool_calls.extend(results);
        };

        let final_result = LoopResult {
            session_id: session_id.to_string(),
            response: String::new(),
            stop_reason,
            tokens_used: total_usage,
            tool_calls: all_tool_calls,
            compacted: compacted_overall,
        };
        self.finalize(session_id, final_result, config.on_stream).await
    }

    async fn finalize(
        &self,
        session_id: &str,
        result: LoopResult,
        on_stream: Option<StreamSink>,
    ) -> Result<LoopResult> {
        self.context
            .accumulate_tokens(session_id, result.tokens_used.input_tokens + result.tokens_used.output_tokens)
            .await?;

        if let Ok(messages) = self.context.build(session_id).await.map(|b| b.messages)
            && let Err(err) = self.archival.persist_turn(session_id, &messages).await
        {
            tracing::warn!(session_id, error = %err, "best-effort turn archival failed");
        }

        if let Some(sink) = on_stream {
            sink(LoopStreamChunk::Done {
                stop_reason: Some(result.stop_reason),
            });
        }

        info!(
            session_id,
            stop_reason = ?result.stop_reason,
            iterations_tokens_in = result.tokens_used.input_tokens,
            iterations_tokens_out = result.tokens_used.output_tokens,
            tool_calls = result.tool_calls.len(),
            "agentic loop finished"
        );

        Ok(result)
    }
}

fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
    messages
        .iter()
        .filter(|m| m.role != MessageRole::System)
        .map(|m| ApiMessage {
            role: match m.role {
                MessageRole::User => "user".to_string(),
                MessageRole::Assistant => "assistant".to_string(),
                MessageRole::System => unreachable!("system messages filtered above"),
            },
            content: crate::context::content_to_value(&m.content),
        })
        .collect()
}

fn llm_block_to_stored(block: &LlmContentBlock) -> StoredBlock {
    match block {
        LlmContentBlock::Text { text } => StoredBlock::Text { text: text.clone() },
        LlmContentBlock::ToolUse { id, name, input } => StoredBlock::ToolUse {
            id: id.clone(),
            name: name.clone(),
            input: input.clone(),
        },
    }
}
