//! Shared error types.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ToolError>;

/// Errors surfaced at the tool/store/provider boundary. Wrapped into
/// `anyhow::Error` only at process-boundary call sites (CLI, work loop).
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool not found: {0}")]
    NotFound(String),

    #[error("tool error: {0}")]
    Tool(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("timed out after {0}ms")]
    Timeout(u64),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
