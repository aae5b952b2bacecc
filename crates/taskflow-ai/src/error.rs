//! Crate-local error type; converts to `taskflow_traits::error::ToolError`
//! at the trait boundary so the agentic loop only ever sees one error type.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AiError>;

#[derive(Debug, Error)]
pub enum AiError {
    #[error("provider transport error: {0}")]
    Transport(String),

    #[error("provider returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("rate limited after exhausting retries: {0}")]
    RateLimitExhausted(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl From<AiError> for taskflow_traits::error::ToolError {
    fn from(err: AiError) -> Self {
        taskflow_traits::error::ToolError::Provider(err.to_string())
    }
}
