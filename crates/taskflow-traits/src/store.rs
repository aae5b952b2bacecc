//! Store capability traits: the ports the core depends on.
//!
//! Each trait is a small interface implemented once per backend (see
//! `taskflow-storage` for the redb-backed implementation). None of these
//! mutate DAG/lifecycle invariants themselves — that logic lives in
//! `taskflow-core`'s Task Manager; stores are dumb persistence.

use async_trait::async_trait;
use serde_json::Value;
use taskflow_contracts::message::{Message, MessageRole};
use taskflow_contracts::session::Session;
use taskflow_contracts::subagent::SubagentRecord;
use taskflow_contracts::task::{Task, TaskStatus};

use crate::error::Result;

/// Partial update to a session. `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub last_activity_at: Option<i64>,
    pub compaction_count: Option<u32>,
    pub total_tokens: Option<u64>,
    pub flags: Option<serde_json::Map<String, Value>>,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Session>>;
    async fn create(&self, session: Session) -> Result<Session>;
    async fn update(&self, id: &str, diff: SessionUpdate) -> Result<Session>;
    async fn list(&self) -> Result<Vec<Session>>;
}

/// Input for appending a new message.
#[derive(Debug, Clone)]
pub struct MessageCreate {
    pub parent_id: Option<String>,
    pub role: MessageRole,
    pub content: taskflow_contracts::message::MessageContent,
    pub created_at: i64,
    pub token_count: Option<u32>,
}

/// Result of chain validation: whether every non-root message's parent
/// exists and belongs to the same session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainValidity {
    pub valid: bool,
    pub broken_at: Option<String>,
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn create(&self, session_id: &str, input: MessageCreate) -> Result<Message>;
    async fn list(&self, session_id: &str) -> Result<Vec<Message>>;
    async fn get_token_count(&self, session_id: &str) -> Result<u64>;
    async fn delete_session(&self, session_id: &str) -> Result<()>;
    async fn validate_chain(&self, session_id: &str) -> Result<ChainValidity>;
}

/// Task creation input.
#[derive(Debug, Clone)]
pub struct TaskCreate {
    pub subject: String,
    pub description: String,
    pub active_form: Option<String>,
    pub owner: Option<String>,
    pub blocked_by: Vec<String>,
    pub metadata: serde_json::Map<String, Value>,
    pub time_budget_ms: Option<u64>,
    pub verify_command: Option<String>,
}

/// Additive/subtractive dependency diff plus plain field updates, mirroring
/// `update(id, diff)`'s shape. `status`/`failure_context`/
/// `retry_count` are set only by the Task Manager's claim/fail/retry
/// operations (routed through the same `update` call) —
/// the store itself does not validate the claim/fail/retry transition
/// table, it only persists whatever the caller already validated.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub subject: Option<String>,
    pub description: Option<String>,
    pub active_form: Option<String>,
    pub clear_owner: bool,
    pub owner: Option<String>,
    pub add_blocks: Vec<String>,
    pub remove_blocks: Vec<String>,
    pub add_blocked_by: Vec<String>,
    pub remove_blocked_by: Vec<String>,
    pub metadata: Option<serde_json::Map<String, Value>>,
    pub time_budget_ms: Option<u64>,
    pub verify_command: Option<String>,
    pub status: Option<TaskStatus>,
    pub failure_context: Option<String>,
    pub retry_count: Option<u32>,
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create(&self, input: TaskCreate) -> Result<Task>;
    async fn get(&self, id: &str) -> Result<Option<Task>>;
    async fn update(&self, id: &str, diff: TaskUpdate) -> Result<Task>;
    async fn delete(&self, id: &str) -> Result<Task>;
    async fn list(&self) -> Result<Vec<Task>>;

    /// Pending, unblocked (`blockedBy` empty), owner absent or matching.
    async fn get_available(&self, owner: Option<&str>) -> Result<Vec<Task>>;
    /// Pending with a nonempty `blockedBy`.
    async fn get_blocked(&self) -> Result<Vec<Task>>;
    async fn get_in_progress(&self, owner: Option<&str>) -> Result<Vec<Task>>;
}

#[async_trait]
pub trait SubagentStore: Send + Sync {
    async fn create(&self, record: SubagentRecord) -> Result<SubagentRecord>;
    async fn update(&self, record: SubagentRecord) -> Result<SubagentRecord>;
    async fn get(&self, id: &str) -> Result<Option<SubagentRecord>>;
    async fn get_running(&self) -> Result<Vec<SubagentRecord>>;
    /// Forcibly finalize (as `timeout`) any running record whose
    /// `spawned_at + timeout_ms` is older than `now - older_than_ms`.
    async fn mark_orphaned(&self, older_than_ms: i64) -> Result<Vec<SubagentRecord>>;
}
