//! Streaming Anthropic Messages API client: builds a `(system, messages,
//! tools) -> stream of SSE events -> assembled result` request/response
//! cycle, reassembling `content_block_*`/`message_delta` events into
//! `ContentBlock`s as they arrive.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use serde_json::{Value, json};
use taskflow_traits::error::ToolError;
use taskflow_traits::llm::{
    CompletionRequest, CompletionResult, ContentBlock, LlmProvider, StopReason, StreamCallback,
    StreamChunk, Usage,
};

const API_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";

pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    default_model: String,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.anthropic.com".to_string(),
            default_model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn model_for(&self, requested: &str) -> String {
        if requested == "default" {
            self.default_model.clone()
        } else {
            requested.to_string()
        }
    }

    fn build_body(&self, request: &CompletionRequest) -> Value {
        let tools: Vec<Value> = request
            .tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters,
                })
            })
            .collect();

        json!({
            "model": self.model_for(&request.model),
            "system": request.system_prompt,
            "messages": request.messages.iter().map(|m| json!({"role": m.role, "content": m.content})).collect::<Vec<_>>(),
            "tools": tools,
            "max_tokens": request.max_tokens,
            "stream": true,
        })
    }
}

/// Incrementally assembles SSE `data:` lines into `StreamChunk`s, mirroring
/// the Anthropic Messages streaming event shape
/// (`content_block_start`/`_delta`/`_stop`, `message_delta`, `message_stop`).
#[derive(Default)]
struct StreamAssembler {
    content: Vec<ContentBlock>,
    current_text: Option<String>,
    current_tool: Option<(String, String, String)>, // id, name, partial_json
    stop_reason: Option<StopReason>,
    usage: Usage,
}

impl StreamAssembler {
    fn finalize_text_block(&mut self) {
        if let Some(text) = self.current_text.take() {
            self.content.push(ContentBlock::Text { text });
        }
    }

    fn finalize_tool_block(&mut self) {
        if let Some((id, name, partial_json)) = self.current_tool.take() {
            let input: Value = serde_json::from_str(&partial_json).unwrap_or(Value::Null);
            self.content.push(ContentBlock::ToolUse { id, name, input });
        }
    }

    fn handle_event(&mut self, event: &Value, on_chunk: Option<&StreamCallback>) {
        match event.get("type").and_then(Value::as_str) {
            Some("content_block_start") => {
                let block = event.get("content_block");
                match block.and_then(|b| b.get("type")).and_then(Value::as_str) {
                    Some("text") => self.current_text = Some(String::new()),
                    Some("tool_use") => {
                        let id = block
                            .and_then(|b| b.get("id"))
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string();
                        let name = block
                            .and_then(|b| b.get("name"))
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string();
                        self.current_tool = Some((id, name, String::new()));
                    }
                    _ => {}
                }
            }
            Some("content_block_delta") => {
                let delta = event.get("delta");
                if let Some(text) = delta.and_then(|d| d.get("text")).and_then(Value::as_str) {
                    if let Some(buf) = &mut self.current_text {
                        buf.push_str(text);
                    }
                    if let Some(cb) = on_chunk {
                        cb(&StreamChunk::Text {
                            text: text.to_string(),
                        });
                    }
                } else if let Some(partial) = delta
                    .and_then(|d| d.get("partial_json"))
                    .and_then(Value::as_str)
                    && let Some((_, _, buf)) = &mut self.current_tool
                {
                    buf.push_str(partial);
                }
            }
            Some("content_block_stop") => {
                if self.current_text.is_some() {
                    self.finalize_text_block();
                } else if let Some((id, name, input_json)) = self.current_tool.clone() {
                    self.finalize_tool_block();
                    if let Some(cb) = on_chunk {
                        let input: Value =
                            serde_json::from_str(&input_json).unwrap_or(Value::Null);
                        cb(&StreamChunk::ToolUse { id, name, input });
                    }
                }
            }
            Some("message_delta") => {
                if let Some(reason) = event
                    .get("delta")
                    .and_then(|d| d.get("stop_reason"))
                    .and_then(Value::as_str)
                {
                    self.stop_reason = Some(match reason {
                        "tool_use" => StopReason::ToolUse,
                        "max_tokens" => StopReason::MaxTokens,
                        _ => StopReason::EndTurn,
                    });
                }
                if let Some(output) = event
                    .get("usage")
                    .and_then(|u| u.get("output_tokens"))
                    .and_then(Value::as_u64)
                {
                    self.usage.output_tokens = output;
                }
            }
            Some("message_start") => {
                if let Some(input) = event
                    .get("message")
                    .and_then(|m| m.get("usage"))
                    .and_then(|u| u.get("input_tokens"))
                    .and_then(Value::as_u64)
                {
                    self.usage.input_tokens = input;
                }
            }
            _ => {}
        }
    }

    fn finish(mut self, on_chunk: Option<&StreamCallback>) -> CompletionResult {
        self.finalize_text_block();
        self.finalize_tool_block();
        if let Some(cb) = on_chunk {
            cb(&StreamChunk::Done {
                stop_reason: self.stop_reason,
            });
        }
        CompletionResult {
            content: self.content,
            stop_reason: self.stop_reason,
            usage: self.usage,
        }
    }
}

fn parse_sse_lines(buffer: &mut String, chunk: &[u8]) -> Vec<Value> {
    buffer.push_str(&String::from_utf8_lossy(chunk));
    let mut events = Vec::new();
    while let Some(pos) = buffer.find("\n\n") {
        let frame: String = buffer.drain(..pos + 2).collect();
        for line in frame.lines() {
            if let Some(data) = line.strip_prefix("data: ")
                && let Ok(value) = serde_json::from_str::<Value>(data)
            {
                events.push(value);
            }
        }
    }
    events
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn complete(
        &self,
        request: CompletionRequest,
        on_chunk: Option<&StreamCallback>,
    ) -> std::result::Result<CompletionResult, ToolError> {
        let body = self.build_body(&request);
        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| ToolError::Provider(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ToolError::Provider(format!(
                "status {}: {}",
                status.as_u16(),
                text
            )));
        }

        let mut assembler = StreamAssembler::default();
        let mut buffer = String::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk: Bytes = chunk.map_err(|e| ToolError::Provider(e.to_string()))?;
            for event in parse_sse_lines(&mut buffer, &chunk) {
                assembler.handle_event(&event, on_chunk);
            }
        }

        Ok(assembler.finish(on_chunk))
    }
}
