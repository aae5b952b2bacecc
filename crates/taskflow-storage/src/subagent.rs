use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use taskflow_contracts::subagent::{SubagentRecord, SubagentStatus};
use taskflow_traits::error::{Result, ToolError};
use taskflow_traits::store::SubagentStore;

use crate::time::now_ms;

const SUBAGENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("subagents");

/// redb-backed `SubagentStore`, keyed by subagent id.
pub struct RedbSubagentStore {
    db: Arc<Database>,
}

impl RedbSubagentStore {
    pub fn new(db: Arc<Database>) -> anyhow::Result<Self> {
        let write_txn = db.begin_write()?;
        write_txn.open_table(SUBAGENTS)?;
        write_txn.commit()?;
        Ok(Self { db })
    }

    fn write(&self, record: &SubagentRecord) -> Result<()> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| ToolError::Storage(e.to_string()))?;
        {
            let mut table = write_txn
                .open_table(SUBAGENTS)
                .map_err(|e| ToolError::Storage(e.to_string()))?;
            let bytes = serde_json::to_vec(record)?;
            table
                .insert(record.id.as_str(), bytes.as_slice())
                .map_err(|e| ToolError::Storage(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| ToolError::Storage(e.to_string()))?;
        Ok(())
    }

    fn scan(&self) -> Result<Vec<SubagentRecord>> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| ToolError::Storage(e.to_string()))?;
        let table = read_txn
            .open_table(SUBAGENTS)
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
impl SubagentStore for RedbSubagentStore {
    async fn create(&self, record: SubagentRecord) -> Result<SubagentRecord> {
        self.write(&record)?;
        Ok(record)
    }

    async fn update(&self, record: SubagentRecord) -> Result<SubagentRecord> {
        self.write(&record)?;
        Ok(record)
    }

    async fn get(&self, id: &str) -> Result<Option<SubagentRecord>> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| ToolError::Storage(e.to_string()))?;
        let table = read_txn
            .open_table(SUBAGENTS)
            .map_err(|e| ToolError::Storage(e.to_string()))?;
        match table
            .get(id)
            .map_err(|e| ToolError::Storage(e.to_string()))?
        {
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
            None => Ok(None),
        }
    }

    async fn get_running(&self) -> Result<Vec<SubagentRecord>> {
        Ok(self
            .scan()?
            .into_iter()
            .filter(|r| r.status == SubagentStatus::Running)
            .collect())
    }

    async fn mark_orphaned(&self, older_than_ms: i64) -> Result<Vec<SubagentRecord>> {
        let cutoff = now_ms() - older_than_ms;
        let mut orphaned = Vec::new();
        for mut record in self.scan()? {
            if record.status == SubagentStatus::Running
                && record.spawned_at + record.timeout_ms as i64 < cutoff
            {
                record.status = SubagentStatus::Timeout;
                record.completed_at = Some(now_ms());
                self.write(&record)?;
                orphaned.push(record);
            }
        }
        Ok(orphaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store() -> RedbSubagentStore {
        let dir = tempdir().unwrap();
        let db = Arc::new(Database::create(dir.path().join("sa.redb")).unwrap());
        std::mem::forget(dir);
        RedbSubagentStore::new(db).unwrap()
    }

    #[tokio::test]
    async fn orphan_sweep_finalizes_stale_running_records() {
        let store = store();
        let mut record = SubagentRecord::new("a1", "researcher", "task", None, 1_000, 0);
        record.spawned_at = 0;
        store.create(record).await.unwrap();

        let orphaned = store.mark_orphaned(500).await.unwrap();
        assert_eq!(orphaned.len(), 1);
        assert_eq!(orphaned[0].status, SubagentStatus::Timeout);
        assert!(store.get_running().await.unwrap().is_empty());
    }
}
