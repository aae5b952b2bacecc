//! Task Manager: the task DAG's CRUD surface plus the invariants
//! (blockedBy/blocks symmetry, the claim/fail/retry transition table, and
//! claim safety) that the store itself deliberately does not enforce (see
//! `taskflow_traits::store::TaskUpdate`'s doc comment). Grounded on
//! `restflow-core::models::agent_task`'s task-queue mutation style,
//! generalized from a priority queue to a DAG, with `claim`/`fail`/`retry`
//! all routing through the same `update` path.

use std::sync::Arc;

use serde_json::json;
use taskflow_contracts::task::{Task, TaskStatus};
use taskflow_traits::error::ToolError;
use taskflow_traits::event::EventBus;
use taskflow_traits::store::{TaskCreate, TaskStore, TaskUpdate};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaskManagerError {
    #[error("task not found: {0}")]
    NotFound(String),
    #[error("task {0} is owned by a different owner")]
    Conflict(String),
    #[error("task {0} has an incomplete blocker and cannot be claimed")]
    Blocked(String),
    #[error("invalid transition for task {id}: {from:?} -> {to:?}")]
    InvalidTransition {
        id: String,
        from: TaskStatus,
        to: TaskStatus,
    },
    #[error(transparent)]
    Store(#[from] ToolError),
}

pub type Result<T> = std::result::Result<T, TaskManagerError>;

pub struct TaskManager {
    tasks: Arc<dyn TaskStore>,
    events: Arc<dyn EventBus>,
}

impl TaskManager {
    pub fn new(tasks: Arc<dyn TaskStore>, events: Arc<dyn EventBus>) -> Self {
        Self { tasks, events }
    }

    /// `create(input)`: always starts `pending`; blocker reverse-edges are
    /// maintained by the store. Emits `task:created`.
    pub async fn create(&self, input: TaskCreate) -> Result<Task> {
        let task = self.tasks.create(input).await?;
        self.events.emit("task:created", json!({ "task": task })).await;
        Ok(task)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Task>> {
        Ok(self.tasks.get(id).await?)
    }

    pub async fn list(&self) -> Result<Vec<Task>> {
        Ok(self.tasks.list().await?)
    }

    /// `update(id, diff)`: the generic mutation path. Validates the status
    /// transition table when `diff.status` is set, then persists and emits
    /// `task:updated{task, changes}` (only when `diff` actually named a
    /// field), `task:completed` on a fresh transition into `completed`
    /// (running cascade unblock), and `task:blocked` on a fresh transition
    /// into a blocked pending state.
    pub async fn update(&self, id: &str, diff: TaskUpdate) -> Result<Task> {
        let before = self
            .tasks
            .get(id)
            .await?
            .ok_or_else(|| TaskManagerError::NotFound(id.to_string()))?;

        if let Some(next) = diff.status
            && !before.status.can_transition_to(next)
        {
            return Err(TaskManagerError::InvalidTransition {
                id: id.to_string(),
                from: before.status,
                to: next,
            });
        }

        let changes = changed_fields(&diff);
        let was_blocked = is_blocked(&before);

        let updated = self.tasks.update(id, diff).await?;

        if !changes.is_empty() {
            self.events
                .emit("task:updated", json!({ "task": updated, "changes": changes }))
                .await;
        }

        if before.status != TaskStatus::Completed && updated.status == TaskStatus::Completed {
            self.events.emit("task:completed", json!({ "task": updated })).await;
            self.cascade_unblock(&updated).await?;
        }

        if !was_blocked && is_blocked(&updated) {
            self.events.emit("task:blocked", json!({ "task": updated })).await;
        }

        Ok(updated)
    }

    /// On completion of `completed`, for each task it directly unblocks:
    /// if every one of that task's blockers has also completed, clear its
    /// `blockedBy` entirely.
    async fn cascade_unblock(&self, completed: &Task) -> Result<()> {
        for blocked_id in &completed.blocks {
            let Some(blocked) = self.tasks.get(blocked_id).await? else {
                continue;
            };
            let mut blocker_statuses = Vec::with_capacity(blocked.blocked_by.len());
            for blocker_id in &blocked.blocked_by {
                match self.tasks.get(blocker_id).await? {
                    Some(blocker) => blocker_statuses.push(blocker.status),
                    None => blocker_statuses.push(TaskStatus::Deleted),
                }
            }
            let all_completed = blocker_statuses
                .iter()
                .all(|status| *status == TaskStatus::Completed);
            if all_completed && !blocked.blocked_by.is_empty() {
                self.tasks
                    .update(
                        blocked_id,
                        TaskUpdate {
                            remove_blocked_by: blocked.blocked_by.iter().cloned().collect(),
                            ..Default::default()
                        },
                    )
                    .await?;
            }
        }
        Ok(())
    }

    /// `claim(id, owner)`: fails if missing, owned by someone else, not
    /// pending, or any blocker isn't `completed`. On success routes through
    /// `update` to set `owner` and `status=in_progress`.
    pub async fn claim(&self, id: &str, owner: &str) -> Result<Task> {
        let task = self
            .tasks
            .get(id)
            .await?
            .ok_or_else(|| TaskManagerError::NotFound(id.to_string()))?;

        if let Some(existing) = &task.owner
            && existing != owner
        {
            return Err(TaskManagerError::Conflict(id.to_string()));
        }
        if task.status != TaskStatus::Pending {
            return Err(TaskManagerError::Blocked(id.to_string()));
        }
        for blocker_id in &task.blocked_by {
            let completed = matches!(
                self.tasks.get(blocker_id).await?,
                Some(blocker) if blocker.status == TaskStatus::Completed
            );
            if !completed {
                return Err(TaskManagerError::Blocked(id.to_string()));
            }
        }

        self.update(
            id,
            TaskUpdate {
                owner: Some(owner.to_string()),
                status: Some(TaskStatus::InProgress),
                ..Default::default()
            },
        )
        .await
    }

    /// `fail(id, message)`: status=`failed`, truncated `failureContext`,
    /// `retryCount` incremented.
    pub async fn fail(&self, id: &str, message: &str) -> Result<Task> {
        let task = self
            .tasks
            .get(id)
            .await?
            .ok_or_else(|| TaskManagerError::NotFound(id.to_string()))?;
        self.update(
            id,
            TaskUpdate {
                status: Some(TaskStatus::Failed),
                failure_context: Some(message.to_string()),
                retry_count: Some(task.retry_count + 1),
                ..Default::default()
            },
        )
        .await
    }

    /// `retry(id)`: fails unless currently `failed`. `failureContext` and
    /// `retryCount` persist across the transition.
    pub async fn retry(&self, id: &str) -> Result<Task> {
        let task = self
            .tasks
            .get(id)
            .await?
            .ok_or_else(|| TaskManagerError::NotFound(id.to_string()))?;
        if task.status != TaskStatus::Failed {
            return Err(TaskManagerError::InvalidTransition {
                id: id.to_string(),
                from: task.status,
                to: TaskStatus::Pending,
            });
        }
        self.update(
            id,
            TaskUpdate {
                status: Some(TaskStatus::Pending),
                clear_owner: true,
                ..Default::default()
            },
        )
        .await
    }

    /// Soft delete: status=`deleted` plus back-edge cleanup on every peer
    /// (performed by the store).
    pub async fn delete(&self, id: &str) -> Result<Task> {
        Ok(self.tasks.delete(id).await?)
    }

    pub async fn get_available(&self, owner: Option<&str>) -> Result<Vec<Task>> {
        Ok(self.tasks.get_available(owner).await?)
    }

    pub async fn get_blocked(&self) -> Result<Vec<Task>> {
        Ok(self.tasks.get_blocked().await?)
    }

    pub async fn get_in_progress(&self, owner: Option<&str>) -> Result<Vec<Task>> {
        Ok(self.tasks.get_in_progress(owner).await?)
    }
}

fn is_blocked(task: &Task) -> bool {
    task.status == TaskStatus::Pending && !task.blocked_by.is_empty()
}

fn changed_fields(diff: &TaskUpdate) -> Vec<&'static str> {
    let mut changes = Vec::new();
    if diff.subject.is_some() {
        changes.push("subject");
    }
    if diff.description.is_some() {
        changes.push("description");
    }
    if diff.active_form.is_some() {
        changes.push("active_form");
    }
    if diff.clear_owner || diff.owner.is_some() {
        changes.push("owner");
    }
    if !diff.add_blocks.is_empty() || !diff.remove_blocks.is_empty() {
        changes.push("blocks");
    }
    if !diff.add_blocked_by.is_empty() || !diff.remove_blocked_by.is_empty() {
        changes.push("blocked_by");
    }
    if diff.metadata.is_some() {
        changes.push("metadata");
    }
    if diff.time_budget_ms.is_some() {
        changes.push("time_budget_ms");
    }
    if diff.verify_command.is_some() {
        changes.push("verify_command");
    }
    if diff.status.is_some() {
        changes.push("status");
    }
    if diff.failure_context.is_some() {
        changes.push("failure_context");
    }
    if diff.retry_count.is_some() {
        changes.push("retry_count");
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::InProcessEventBus;
    use taskflow_storage::Storage;

    fn manager() -> (TaskManager, Storage) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tm.redb");
        std::mem::forget(dir);
        let storage = Storage::open(path.to_str().unwrap()).unwrap();
        let events = Arc::new(InProcessEventBus::new());
        let manager = TaskManager::new(storage.tasks.clone(), events);
        (manager, storage)
    }

    fn input(subject: &str) -> TaskCreate {
        TaskCreate {
            subject: subject.to_string(),
            description: String::new(),
            active_form: None,
            owner: None,
            blocked_by: Vec::new(),
            metadata: serde_json::Map::new(),
            time_budget_ms: None,
            verify_command: None,
        }
    }

    #[tokio::test]
    async fn claim_requires_pending_and_completed_blockers() {
        let (manager, _storage) = manager();
        let blocker = manager.create(input("blocker")).await.unwrap();
        let mut blocked_input = input("blocked");
        blocked_input.blocked_by = vec![blocker.id.clone()];
        let blocked = manager.create(blocked_input).await.unwrap();

        assert!(matches!(
            manager.claim(&blocked.id, "work-loop").await,
            Err(TaskManagerError::Blocked(_))
        ));

        manager.claim(&blocker.id, "work-loop").await.unwrap();
        let completed = manager
            .update(
                &blocker.id,
                TaskUpdate {
                    status: Some(TaskStatus::Completed),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(completed.status, TaskStatus::Completed);

        let claimed = manager.claim(&blocked.id, "work-loop").await.unwrap();
        assert_eq!(claimed.status, TaskStatus::InProgress);
        assert_eq!(claimed.owner.as_deref(), Some("work-loop"));
    }

    #[tokio::test]
    async fn claim_rejects_conflicting_owner() {
        let (manager, _storage) = manager();
        let task = manager.create(input("solo")).await.unwrap();
        manager.claim(&task.id, "alice").await.unwrap();
        let err = manager.claim(&task.id, "bob").await.unwrap_err();
        assert!(matches!(err, TaskManagerError::Conflict(_)));
    }

    #[tokio::test]
    async fn cascade_unblock_clears_blocked_by_once_every_blocker_completes() {
        let (manager, _storage) = manager();
        let b1 = manager.create(input("b1")).await.unwrap();
        let b2 = manager.create(input("b2")).await.unwrap();
        let mut dependent_input = input("dependent");
        dependent_input.blocked_by = vec![b1.id.clone(), b2.id.clone()];
        let dependent = manager.create(dependent_input).await.unwrap();

        manager.claim(&b1.id, "w").await.unwrap();
        manager
            .update(&b1.id, TaskUpdate { status: Some(TaskStatus::Completed), ..Default::default() })
            .await
            .unwrap();

        let still_blocked = manager.get(&dependent.id).await.unwrap().unwrap();
        assert!(still_blocked.blocked_by.contains(&b2.id));

        manager.claim(&b2.id, "w").await.unwrap();
        manager
            .update(&b2.id, TaskUpdate { status: Some(TaskStatus::Completed), ..Default::default() })
            .await
            .unwrap();

        let unblocked = manager.get(&dependent.id).await.unwrap().unwrap();
        assert!(unblocked.blocked_by.is_empty());
    }

    #[tokio::test]
    async fn fail_then_retry_round_trip() {
        let (manager, _storage) = manager();
        let task = manager.create(input("flaky")).await.unwrap();
        manager.claim(&task.id, "w").await.unwrap();

        let failed = manager.fail(&task.id, "boom").await.unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.retry_count, 1);
        assert_eq!(failed.failure_context.as_deref(), Some("boom"));

        let retried = manager.retry(&task.id).await.unwrap();
        assert_eq!(retried.status, TaskStatus::Pending);
        assert!(retried.owner.is_none());
        assert_eq!(retried.retry_count, 1);
        assert_eq!(retried.failure_context.as_deref(), Some("boom"));

        assert!(matches!(
            manager.retry(&task.id).await.unwrap_err(),
            TaskManagerError::InvalidTransition { .. }
        ));
    }

    #[tokio::test]
    async fn delete_soft_deletes_and_cleans_back_edges() {
        let (manager, _storage) = manager();
        let blocker = manager.create(input("blocker")).await.unwrap();
        let mut dependent_input = input("dependent");
        dependent_input.blocked_by = vec![blocker.id.clone()];
        let dependent = manager.create(dependent_input).await.unwrap();

        let deleted = manager.delete(&blocker.id).await.unwrap();
        assert_eq!(deleted.status, TaskStatus::Deleted);

        let dependent = manager.get(&dependent.id).await.unwrap().unwrap();
        assert!(dependent.blocked_by.is_empty());
    }
}
