//! Task record and DAG status.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Deleted,
}

impl TaskStatus {
    /// Valid terminal-to-terminal and retry transitions. `Deleted` is
    /// reachable from any status and is not itself a source. `Completed ->
    /// Failed` covers the verifier reopening a task whose `verifyCommand`
    /// ran after completion and failed.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (_, Deleted) => true,
            (Pending, InProgress) => true,
            (InProgress, Completed) | (InProgress, Failed) => true,
            (Completed, Failed) => true,
            (Failed, Pending) => true,
            _ => false,
        }
    }
}

/// A node in the task DAG. `blockedBy`/`blocks` are references, not owned
/// edges: deleting a task marks it `Deleted` rather than dropping it from
/// the graph, and dangling back-edges are cleaned up by the owning store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub subject: String,
    pub description: String,
    pub active_form: Option<String>,
    pub status: TaskStatus,
    pub owner: Option<String>,
    pub blocked_by: BTreeSet<String>,
    pub blocks: BTreeSet<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub time_budget_ms: Option<u64>,
    pub verify_command: Option<String>,
    pub failure_context: Option<String>,
    pub retry_count: u32,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Failure context is capped at this many characters before being stored.
pub const MAX_FAILURE_CONTEXT_CHARS: usize = 2000;

impl Task {
    pub fn new(id: impl Into<String>, subject: impl Into<String>, now: i64) -> Self {
        Self {
            id: id.into(),
            subject: subject.into(),
            description: String::new(),
            active_form: None,
            status: TaskStatus::Pending,
            owner: None,
            blocked_by: BTreeSet::new(),
            blocks: BTreeSet::new(),
            metadata: serde_json::Map::new(),
            time_budget_ms: None,
            verify_command: None,
            failure_context: None,
            retry_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// A task is claimable iff it is pending and every blocker has completed.
    pub fn is_claimable(&self, blocker_statuses: impl IntoIterator<Item = TaskStatus>) -> bool {
        self.status == TaskStatus::Pending
            && blocker_statuses
                .into_iter()
                .all(|s| s == TaskStatus::Completed)
    }

    pub fn set_failure_context(&mut self, context: impl Into<String>) {
        let context = context.into();
        let truncated = if context.len() > MAX_FAILURE_CONTEXT_CHARS {
            let mut end = MAX_FAILURE_CONTEXT_CHARS;
            while end > 0 && !context.is_char_boundary(end) {
                end -= 1;
            }
            context[..end].to_string()
        } else {
            context
        };
        self.failure_context = Some(truncated);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_transition_allowed() {
        assert!(TaskStatus::Failed.can_transition_to(TaskStatus::Pending));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Pending));
    }

    #[test]
    fn deleted_reachable_from_anywhere() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Deleted));
        assert!(TaskStatus::Completed.can_transition_to(TaskStatus::Deleted));
    }

    #[test]
    fn failure_context_is_truncated() {
        let mut task = Task::new("t1", "subject", 0);
        task.set_failure_context("x".repeat(MAX_FAILURE_CONTEXT_CHARS + 500));
        assert_eq!(
            task.failure_context.unwrap().len(),
            MAX_FAILURE_CONTEXT_CHARS
        );
    }

    #[test]
    fn failure_context_truncation_respects_utf8_boundaries() {
        let mut task = Task::new("t1", "subject", 0);
        let context = "你".repeat(MAX_FAILURE_CONTEXT_CHARS);
        task.set_failure_context(context);
        let truncated = task.failure_context.unwrap();
        assert!(truncated.len() <= MAX_FAILURE_CONTEXT_CHARS);
        assert!(!truncated.contains('\u{FFFD}'));
    }
}
