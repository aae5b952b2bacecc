//! Sub-agent data types and trait definitions.
//!
//! Runtime implementations (the spawner, the active-subagent tracker) live
//! in `taskflow-core::agent_registry`; this crate only defines the shapes
//! the registry, the agentic loop, and the `SpawnAgent` tool share.

use serde::{Deserialize, Serialize};
pub use taskflow_contracts::subagent::{SubagentRecord, SubagentStatus};

use crate::error::ToolError;

/// Snapshot of a sub-agent definition with all fields needed to start a run.
///
/// Decouples the agentic loop from the concrete `AgentDefinition` struct
/// (which carries loader-specific fields the loop doesn't need).
#[derive(Debug, Clone)]
pub struct SubagentDefSnapshot {
    pub name: String,
    pub system_prompt: String,
    pub allowed_tools: Vec<String>,
    pub max_iterations: Option<u32>,
}

/// Summary info for listing a sub-agent definition.
#[derive(Debug, Clone, Serialize)]
pub struct SubagentDefSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
}

/// Trait for looking up sub-agent definitions by ID.
///
/// Implemented by the definition registry in `taskflow-core` so the
/// agentic loop can spawn sub-agents without depending on it directly —
/// the two otherwise reference each other cyclically.
pub trait SubagentDefLookup: Send + Sync {
    /// Look up a sub-agent definition by ID, returning a snapshot of the
    /// fields needed for execution.
    fn lookup(&self, id: &str) -> Option<SubagentDefSnapshot>;

    /// List all callable sub-agent definitions in registration order.
    fn list_callable(&self) -> Vec<SubagentDefSummary>;
}

/// Configuration for sub-agent execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubagentConfig {
    pub max_parallel_agents: usize,
    pub subagent_timeout_secs: u64,
    pub max_iterations: usize,
    pub max_depth: usize,
}

impl Default for SubagentConfig {
    fn default() -> Self {
        Self {
            max_parallel_agents: 5,
            subagent_timeout_secs: 300,
            // Fixed per the nested subagent loop's own iteration budget,
            // not an independent knob — kept distinct from the top-level
            // loop's `max_iterations` default.
            max_iterations: 50,
            max_depth: 3,
        }
    }
}

/// Request to spawn a sub-agent via the `SpawnAgent` tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnRequest {
    pub agent_id: String,
    pub task: String,
    pub timeout_secs: Option<u64>,
    pub parent_id: Option<String>,
    pub depth: Option<usize>,
    pub resume_session_id: Option<String>,
}

/// Handle returned after spawning a sub-agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnHandle {
    pub id: String,
    pub agent_name: String,
}

/// Result from a sub-agent execution, handed back to the parent loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubagentResult {
    pub success: bool,
    pub output: String,
    pub summary: Option<String>,
    pub duration_ms: u64,
    pub tokens_used: Option<u64>,
    pub tool_use_count: u32,
    pub error: Option<String>,
}

/// Completion notification delivered to whoever is waiting on a spawn.
#[derive(Debug, Clone)]
pub struct SubagentCompletion {
    pub id: String,
    pub result: SubagentResult,
}

/// High-level subagent lifecycle management, abstracting the registry so
/// tool implementations and the work loop can spawn/await subagents
/// without depending on `taskflow-core` directly.
#[async_trait::async_trait]
pub trait SubagentManager: Send + Sync {
    /// Spawn a new sub-agent from a [`SpawnRequest`]. Rejects when
    /// `depth >= config().max_depth`.
    async fn spawn(&self, request: SpawnRequest) -> std::result::Result<SpawnHandle, ToolError>;

    fn list_callable(&self) -> Vec<SubagentDefSummary>;

    fn list_running(&self) -> Vec<SubagentRecord>;

    fn running_count(&self) -> usize;

    /// Wait for a sub-agent to complete, returning its result.
    async fn wait(&self, id: &str) -> Option<SubagentResult>;

    fn config(&self) -> &SubagentConfig;
}
