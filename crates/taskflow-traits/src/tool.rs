//! Tool trait and types for agent tool execution.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// JSON Schema for tool parameters, as handed to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Result of tool execution. `result`/`error` mirror the executor's
/// `{content, isError}` record; `error_category`/`retryable`/`retry_after_ms`
/// are ambient classification used by per-tool retry, not part of the
/// executor-facing record itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    pub result: Value,
    pub error: Option<String>,
    pub error_category: Option<ToolErrorCategory>,
    pub retryable: Option<bool>,
    pub retry_after_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ToolErrorCategory {
    Network,
    Auth,
    Config,
    Execution,
    RateLimit,
    NotFound,
}

impl ToolOutput {
    pub fn success(result: Value) -> Self {
        Self {
            success: true,
            result,
            error: None,
            error_category: None,
            retryable: None,
            retry_after_ms: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            result: Value::Null,
            error: Some(message.into()),
            error_category: None,
            retryable: None,
            retry_after_ms: None,
        }
    }

    pub fn retryable_error(message: impl Into<String>, category: ToolErrorCategory) -> Self {
        Self {
            success: false,
            result: Value::Null,
            error: Some(message.into()),
            error_category: Some(category),
            retryable: Some(true),
            retry_after_ms: None,
        }
    }

    pub fn non_retryable_error(message: impl Into<String>, category: ToolErrorCategory) -> Self {
        Self {
            success: false,
            result: Value::Null,
            error: Some(message.into()),
            error_category: Some(category),
            retryable: Some(false),
            retry_after_ms: None,
        }
    }

    /// Convert to the `{toolUseId, content, isError}` shape the agentic
    /// loop appends as a tool-result content block.
    pub fn into_content(self, tool_use_id: impl Into<String>) -> (String, String, bool) {
        let content = if self.success {
            self.result.to_string()
        } else {
            self.error.unwrap_or_else(|| "tool failed".to_string())
        };
        (tool_use_id.into(), content, !self.success)
    }
}

/// Core trait for agent tools. Implemented once per concrete tool (read,
/// write, edit, bash, grep, glob, ...); the executor dispatches by name
/// looked up in a [`crate::registry::ToolRegistry`].
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name (used in LLM function calls and the whitelist).
    fn name(&self) -> &str;

    /// Human-readable description for LLM context.
    fn description(&self) -> &str;

    /// JSON Schema for input parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute the tool with given input.
    async fn execute(&self, input: Value) -> Result<ToolOutput>;

    /// Whether this tool is safe to run concurrently with itself and other
    /// tools (vs. requiring per-target serialization). Defaults to unsafe;
    /// concrete tools override when they have no side effects on shared
    /// state (e.g. `read`, `grep`, `glob`).
    fn is_safe(&self) -> bool {
        false
    }

    /// The serialization key for unsafe tools: calls sharing a key run
    /// sequentially. Tools that mutate a filesystem path should return that
    /// path; tools with no identifiable target fall back to the
    /// `__unknown__` sentinel, which serializes with every other unmapped
    /// unsafe call.
    fn target_key(&self, _input: &Value) -> String {
        "__unknown__".to_string()
    }

    /// Build complete schema for LLM.
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}
