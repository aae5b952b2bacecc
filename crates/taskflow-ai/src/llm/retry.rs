//! Rate-limit-retrying decorator over any `LlmProvider`. Retries only
//! 429/rate-limit/overloaded errors, on a fixed five-step backoff
//! schedule, and surfaces everything else immediately.

use std::sync::Arc;

use async_trait::async_trait;
use taskflow_traits::error::ToolError;
use taskflow_traits::llm::{
    CompletionRequest, CompletionResult, LlmProvider, RATE_LIMIT_RETRY_DELAYS_MS, StreamCallback,
    is_rate_limit_error,
};
use tracing::warn;

pub struct RetryingProvider<P: LlmProvider> {
    inner: P,
}

impl<P: LlmProvider> RetryingProvider<P> {
    pub fn new(inner: P) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<P: LlmProvider> LlmProvider for RetryingProvider<P> {
    fn default_model(&self) -> &str {
        self.inner.default_model()
    }

    async fn complete(
        &self,
        request: CompletionRequest,
        on_chunk: Option<&StreamCallback>,
    ) -> std::result::Result<CompletionResult, ToolError> {
        let mut attempt = 0usize;
        loop {
            match self.inner.complete(request.clone(), on_chunk).await {
                Ok(result) => return Ok(result),
                Err(err) if is_rate_limit_error(None, &err.to_string()) => {
                    if attempt >= RATE_LIMIT_RETRY_DELAYS_MS.len() {
                        return Err(err);
                    }
                    let delay_ms = RATE_LIMIT_RETRY_DELAYS_MS[attempt];
                    warn!(
                        attempt = attempt + 1,
                        delay_ms, error = %err, "rate-limited, retrying after backoff"
                    );
                    tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Arc-wrapping variant so a single retrying provider can be shared across
/// concurrently dispatched loops without re-wrapping per call.
#[async_trait]
impl LlmProvider for RetryingProvider<Arc<dyn LlmProvider>> {
    fn default_model(&self) -> &str {
        self.inner.default_model()
    }

    async fn complete(
        &self,
        request: CompletionRequest,
        on_chunk: Option<&StreamCallback>,
    ) -> std::result::Result<CompletionResult, ToolError> {
        let mut attempt = 0usize;
        loop {
            match self.inner.complete(request.clone(), on_chunk).await {
                Ok(result) => return Ok(result),
                Err(err) if is_rate_limit_error(None, &err.to_string()) => {
                    if attempt >= RATE_LIMIT_RETRY_DELAYS_MS.len() {
                        return Err(err);
                    }
                    let delay_ms = RATE_LIMIT_RETRY_DELAYS_MS[attempt];
                    tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use taskflow_traits::llm::{ContentBlock, StopReason, Usage};

    struct FlakyProvider {
        fail_times: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmProvider for FlakyProvider {
        fn default_model(&self) -> &str {
            "flaky"
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
            _on_chunk: Option<&StreamCallback>,
        ) -> std::result::Result<CompletionResult, ToolError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_times {
                Err(ToolError::Provider("429 rate limit exceeded".to_string()))
            } else {
                Ok(CompletionResult {
                    content: vec![ContentBlock::Text {
                        text: "ok".to_string(),
                    }],
                    stop_reason: Some(StopReason::EndTurn),
                    usage: Usage::default(),
                })
            }
        }
    }

    fn req() -> CompletionRequest {
        CompletionRequest {
            system_prompt: String::new(),
            messages: vec![],
            tools: vec![],
            model: "default".to_string(),
            max_tokens: 100,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_rate_limit_errors_until_success() {
        let provider = RetryingProvider::new(FlakyProvider {
            fail_times: 2,
            calls: AtomicUsize::new(0),
        });
        let result = provider.complete(req(), None).await.unwrap();
        assert_eq!(result.content.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_five_retries() {
        let provider = RetryingProvider::new(FlakyProvider {
            fail_times: 100,
            calls: AtomicUsize::new(0),
        });
        let result = provider.complete(req(), None).await;
        assert!(result.is_err());
        assert_eq!(
            provider.inner.calls.load(Ordering::SeqCst),
            RATE_LIMIT_RETRY_DELAYS_MS.len() + 1
        );
    }

    #[tokio::test]
    async fn does_not_retry_non_rate_limit_errors() {
        struct AlwaysInvalid;
        #[async_trait]
        impl LlmProvider for AlwaysInvalid {
            fn default_model(&self) -> &str {
                "x"
            }
            async fn complete(
                &self,
                _request: CompletionRequest,
                _on_chunk: Option<&StreamCallback>,
            ) -> std::result::Result<CompletionResult, ToolError> {
                Err(ToolError::Provider("invalid api key".to_string()))
            }
        }
        let provider = RetryingProvider::new(AlwaysInvalid);
        assert!(provider.complete(req(), None).await.is_err());
    }
}
