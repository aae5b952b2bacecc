//! Scripted provider for agentic-loop tests: returns canned responses in
//! order and records every request it was handed.

use std::sync::Mutex;

use async_trait::async_trait;
use taskflow_traits::error::ToolError;
use taskflow_traits::llm::{CompletionRequest, CompletionResult, LlmProvider, StreamCallback};

pub struct MockProvider {
    default_model: String,
    responses: Mutex<Vec<CompletionResult>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockProvider {
    pub fn new(responses: Vec<CompletionResult>) -> Self {
        Self {
            default_model: "mock-default".to_string(),
            responses: Mutex::new(responses),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Requests seen so far, in call order — lets tests assert on what the
    /// loop actually sent (system prompt, message history, tool schemas).
    pub fn seen_requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().expect("mock requests lock poisoned").clone()
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn complete(
        &self,
        request: CompletionRequest,
        _on_chunk: Option<&StreamCallback>,
    ) -> std::result::Result<CompletionResult, ToolError> {
        self.requests
            .lock()
            .expect("mock requests lock poisoned")
            .push(request);
        let mut responses = self.responses.lock().expect("mock responses lock poisoned");
        if responses.is_empty() {
            return Err(ToolError::Provider(
                "MockProvider exhausted its scripted responses".to_string(),
            ));
        }
        Ok(responses.remove(0))
    }
}
