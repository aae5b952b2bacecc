//! Taskflow Traits - Shared trait definitions and core abstractions.
//!
//! This crate provides the capability-set interfaces used across the
//! Taskflow workspace so that concrete backends (storage, LLM providers,
//! tools) can be swapped without consumers depending on them directly:
//! - `Tool` / `ToolOutput` / `ToolRegistry` / wrapper decorators
//! - `LlmProvider` and the rate-limit-retry detection rule
//! - `SessionStore` / `MessageStore` / `TaskStore` / `SubagentStore`
//! - `SubagentManager` / `SubagentDefLookup`
//! - `EventBus`

pub mod archival;
pub mod error;
pub mod event;
pub mod llm;
pub mod registry;
pub mod store;
pub mod subagent;
pub mod tool;
pub mod wrapper;

// ── Top-level re-exports ─────────────────────────────────────────────

pub use archival::{NoopArchivalSink, TurnArchivalSink};

pub use error::{Result as ToolResult, ToolError};

pub use tool::{Tool, ToolErrorCategory, ToolOutput, ToolSchema};

pub use registry::ToolRegistry;

pub use wrapper::{RateLimitWrapper, TimeoutWrapper, ToolWrapper, WrappedTool};

pub use store::{
    ChainValidity, MessageCreate, MessageStore, SessionStore, SessionUpdate, SubagentStore,
    TaskCreate, TaskStore, TaskUpdate,
};

pub use subagent::{
    SpawnHandle, SpawnRequest, SubagentCompletion, SubagentConfig, SubagentDefLookup,
    SubagentDefSnapshot, SubagentDefSummary, SubagentManager, SubagentRecord, SubagentResult,
    SubagentStatus,
};

pub use llm::{
    ApiMessage, CompletionRequest, CompletionResult, ContentBlock as LlmContentBlock, LlmProvider,
    RATE_LIMIT_RETRY_DELAYS_MS, StopReason, StreamChunk, Usage, is_rate_limit_error,
};

pub use event::{DEFAULT_MAX_LISTENERS, EventBus, EventHandler, Subscription};
