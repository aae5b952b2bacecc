use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use taskflow_contracts::task::{Task, TaskStatus};
use taskflow_traits::error::{Result, ToolError};
use taskflow_traits::store::{TaskCreate, TaskStore, TaskUpdate};

use crate::time::now_ms;

const TASKS: TableDefinition<&str, &[u8]> = TableDefinition::new("tasks");

/// redb-backed `TaskStore`. A single table keyed by task id, the same
/// "blob of JSON per id" layout the source's task queue used for its
/// `PROCESSING`/`COMPLETED` tables, generalized here to hold every status —
/// the DAG edges live inside the blob itself. This is pure CRUD plus
/// four filtered scans, not a priority queue, so the three-table split the
/// source used for O(1) pop has no counterpart here.
pub struct RedbTaskStore {
    db: Arc<Database>,
}

impl RedbTaskStore {
    pub fn new(db: Arc<Database>) -> anyhow::Result<Self> {
        let write_txn = db.begin_write()?;
        write_txn.open_table(TASKS)?;
        write_txn.commit()?;
        Ok(Self { db })
    }

    fn read(&self, id: &str) -> Result<Option<Task>> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| ToolError::Storage(e.to_string()))?;
        let table = read_txn
            .open_table(TASKS)
            .map_err(|e| ToolError::Storage(e.to_string()))?;
        match table
            .get(id)
            .map_err(|e| ToolError::Storage(e.to_string()))?
        {
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
            None => Ok(None),
        }
    }

    fn write(&self, task: &Task) -> Result<()> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| ToolError::Storage(e.to_string()))?;
        {
            let mut table = write_txn
                .open_table(TASKS)
                .map_err(|e| ToolError::Storage(e.to_string()))?;
            let bytes = serde_json::to_vec(task)?;
            table
                .insert(task.id.as_str(), bytes.as_slice())
                .map_err(|e| ToolError::Storage(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| ToolError::Storage(e.to_string()))?;
        Ok(())
    }

    fn scan(&self) -> Result<Vec<Task>> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| ToolError::Storage(e.to_string()))?;
        let table = read_txn
            .open_table(TASKS)
            .map_err(|e| ToolError::Storage(e.to_string()))?;
        let mut out = Vec::new();
        for entry in table
            .iter()
            .map_err(|e| ToolError::Storage(e.to_string()))?
        {
            let (_, value) = entry.map_err(|e| ToolError::Storage(e.to_string()))?;
            out.push(serde_json::from_slice(value.value())?);
        }
        Ok(out)
    }
}

#[async_trait]
impl TaskStore for RedbTaskStore {
    async fn create(&self, input: TaskCreate) -> Result<Task> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_ms();
        let mut task = Task::new(id, input.subject, now);
        task.description = input.description;
        task.active_form = input.active_form;
        task.owner = input.owner;
        task.blocked_by = input.blocked_by.into_iter().collect();
        task.metadata = input.metadata;
        task.time_budget_ms = input.time_budget_ms;
        task.verify_command = input.verify_command;
        self.write(&task)?;

        // Maintain the reverse edge: this task appears in each blocker's `blocks`.
        for blocker_id in task.blocked_by.clone() {
            if let Some(mut blocker) = self.read(&blocker_id)? {
                blocker.blocks.insert(task.id.clone());
                self.write(&blocker)?;
            }
        }

        Ok(task)
    }

    async fn get(&self, id: &str) -> Result<Option<Task>> {
        self.read(id)
    }

    async fn update(&self, id: &str, diff: TaskUpdate) -> Result<Task> {
        let mut task = self
            .read(id)?
            .ok_or_else(|| ToolError::NotFound(format!("task {id}")))?;

        if let Some(v) = diff.subject {
            task.subject = v;
        }
        if let Some(v) = diff.description {
            task.description = v;
        }
        if let Some(v) = diff.active_form {
            task.active_form = Some(v);
        }
        if diff.clear_owner {
            task.owner = None;
        } else if let Some(v) = diff.owner {
            task.owner = Some(v);
        }
        if let Some(v) = diff.metadata {
            for (k, val) in v {
                task.metadata.insert(k, val);
            }
        }
        if diff.time_budget_ms.is_some() {
            task.time_budget_ms = diff.time_budget_ms;
        }
        if diff.verify_command.is_some() {
            task.verify_command = diff.verify_command;
        }
        if let Some(status) = diff.status {
            task.status = status;
        }
        if let Some(context) = diff.failure_context {
            task.set_failure_context(context);
        }
        if let Some(count) = diff.retry_count {
            task.retry_count = count;
        }

        for blocks_id in &diff.add_blocks {
            task.blocks.insert(blocks_id.clone());
            if let Some(mut peer) = self.read(blocks_id)? {
                peer.blocked_by.insert(task.id.clone());
                self.write(&peer)?;
            }
        }
        for blocks_id in &diff.remove_blocks {
            task.blocks.remove(blocks_id);
            if let Some(mut peer) = self.read(blocks_id)? {
                peer.blocked_by.remove(&task.id);
                self.write(&peer)?;
            }
        }
        for blocker_id in &diff.add_blocked_by {
            task.blocked_by.insert(blocker_id.clone());
            if let Some(mut peer) = self.read(blocker_id)? {
                peer.blocks.insert(task.id.clone());
                self.write(&peer)?;
            }
        }
        for blocker_id in &diff.remove_blocked_by {
            task.blocked_by.remove(blocker_id);
            if let Some(mut peer) = self.read(blocker_id)? {
                peer.blocks.remove(&task.id);
                self.write(&peer)?;
            }
        }

        task.updated_at = now_ms();
        self.write(&task)?;
        Ok(task)
    }

    async fn delete(&self, id: &str) -> Result<Task> {
        let mut task = self
            .read(id)?
            .ok_or_else(|| ToolError::NotFound(format!("task {id}")))?;
        task.status = TaskStatus::Deleted;
        task.updated_at = now_ms();

        for peer_id in task.blocked_by.clone().into_iter().chain(task.blocks.clone()) {
            if let Some(mut peer) = self.read(&peer_id)? {
                peer.blocked_by.remove(id);
                peer.blocks.remove(id);
                self.write(&peer)?;
            }
        }

        self.write(&task)?;
        Ok(task)
    }

    async fn list(&self) -> Result<Vec<Task>> {
        self.scan()
    }

    async fn get_available(&self, owner: Option<&str>) -> Result<Vec<Task>> {
        Ok(self
            .scan()?
            .into_iter()
            .filter(|t| {
                t.status == TaskStatus::Pending
                    && t.blocked_by.is_empty()
                    && match (&t.owner, owner) {
                        (None, _) => true,
                        (Some(o), Some(caller)) => o == caller,
                        (Some(_), None) => false,
                    }
            })
            .collect())
    }

    async fn get_blocked(&self) -> Result<Vec<Task>> {
        Ok(self
            .scan()?
            .into_iter()
            .filter(|t| t.status == TaskStatus::Pending && !t.blocked_by.is_empty())
            .collect())
    }

    async fn get_in_progress(&self, owner: Option<&str>) -> Result<Vec<Task>> {
        Ok(self
            .scan()?
            .into_iter()
            .filter(|t| {
                t.status == TaskStatus::InProgress
                    && owner.is_none_or(|caller| t.owner.as_deref() == Some(caller))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store() -> RedbTaskStore {
        let dir = tempdir().unwrap();
        let db = Arc::new(Database::create(dir.path().join("t.redb")).unwrap());
        std::mem::forget(dir);
        RedbTaskStore::new(db).unwrap()
    }

    fn create_input(subject: &str) -> TaskCreate {
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
    async fn dependency_edges_stay_symmetric() {
        let store = store();
        let blocker = store.create(create_input("blocker")).await.unwrap();
        let mut dependent_input = create_input("dependent");
        dependent_input.blocked_by = vec![blocker.id.clone()];
        let dependent = store.create(dependent_input).await.unwrap();

        let blocker = store.get(&blocker.id).await.unwrap().unwrap();
        assert!(blocker.blocks.contains(&dependent.id));
        assert!(dependent.blocked_by.contains(&blocker.id));
    }

    #[tokio::test]
    async fn available_excludes_blocked_and_owned_by_others() {
        let store = store();
        let blocker = store.create(create_input("b")).await.unwrap();
        let mut blocked_input = create_input("blocked");
        blocked_input.blocked_by = vec![blocker.id.clone()];
        store.create(blocked_input).await.unwrap();

        let available = store.get_available(Some("work-loop")).await.unwrap();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].id, blocker.id);
    }

    #[tokio::test]
    async fn delete_cleans_dangling_back_edges() {
        let store = store();
        let blocker = store.create(create_input("b")).await.unwrap();
        let mut dependent_input = create_input("d");
        dependent_input.blocked_by = vec![blocker.id.clone()];
        let dependent = store.create(dependent_input).await.unwrap();

        store.delete(&blocker.id).await.unwrap();
        let dependent = store.get(&dependent.id).await.unwrap().unwrap();
        assert!(dependent.blocked_by.is_empty());
    }
}
