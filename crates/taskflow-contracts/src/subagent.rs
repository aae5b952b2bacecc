//! Subagent record.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubagentStatus {
    Running,
    Completed,
    Failed,
    Timeout,
}

/// A subagent's persisted state. Created at spawn, terminal at finalize,
/// never reopened — owned by the Agent Registry while running, by the
/// store afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubagentRecord {
    pub id: String,
    pub agent_name: String,
    pub parent_subagent_id: Option<String>,
    pub task: String,
    pub status: SubagentStatus,
    pub spawned_at: i64,
    pub timeout_ms: u64,
    pub result: Option<String>,
    pub tokens_used: u64,
    pub tool_use_count: u32,
    pub completed_at: Option<i64>,
}

impl SubagentRecord {
    pub fn new(
        id: impl Into<String>,
        agent_name: impl Into<String>,
        task: impl Into<String>,
        parent_subagent_id: Option<String>,
        timeout_ms: u64,
        spawned_at: i64,
    ) -> Self {
        Self {
            id: id.into(),
            agent_name: agent_name.into(),
            parent_subagent_id,
            task: task.into(),
            status: SubagentStatus::Running,
            spawned_at,
            timeout_ms,
            result: None,
            tokens_used: 0,
            tool_use_count: 0,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status != SubagentStatus::Running
    }
}
