use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use taskflow_contracts::session::Session;
use taskflow_traits::error::{Result, ToolError};
use taskflow_traits::store::{SessionStore, SessionUpdate};

const SESSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");

/// redb-backed `SessionStore`. One row per session, keyed by id.
pub struct RedbSessionStore {
    db: Arc<Database>,
}

impl RedbSessionStore {
    pub fn new(db: Arc<Database>) -> anyhow::Result<Self> {
        let write_txn = db.begin_write()?;
        write_txn.open_table(SESSIONS)?;
        write_txn.commit()?;
        Ok(Self { db })
    }

    fn read(&self, id: &str) -> Result<Option<Session>> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| ToolError::Storage(e.to_string()))?;
        let table = read_txn
            .open_table(SESSIONS)
            .map_err(|e| ToolError::Storage(e.to_string()))?;
        match table
            .get(id)
            .map_err(|e| ToolError::Storage(e.to_string()))?
        {
            Some(value) => {
                let session: Session = serde_json::from_slice(value.value())?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    fn write(&self, session: &Session) -> Result<()> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| ToolError::Storage(e.to_string()))?;
        {
            let mut table = write_txn
                .open_table(SESSIONS)
                .map_err(|e| ToolError::Storage(e.to_string()))?;
            let bytes = serde_json::to_vec(session)?;
            table
                .insert(session.id.as_str(), bytes.as_slice())
                .map_err(|e| ToolError::Storage(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| ToolError::Storage(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for RedbSessionStore {
    async fn get(&self, id: &str) -> Result<Option<Session>> {
        self.read(id)
    }

    async fn create(&self, session: Session) -> Result<Session> {
        self.write(&session)?;
        Ok(session)
    }

    async fn update(&self, id: &str, diff: SessionUpdate) -> Result<Session> {
        let mut session = self
            .read(id)?
            .ok_or_else(|| ToolError::NotFound(format!("session {id}")))?;
        if let Some(v) = diff.last_activity_at {
            session.last_activity_at = v;
        }
        if let Some(v) = diff.compaction_count {
            session.compaction_count = v;
        }
        if let Some(v) = diff.total_tokens {
            session.total_tokens = v;
        }
        if let Some(flags) = diff.flags {
            session.flags = flags;
        }
        self.write(&session)?;
        Ok(session)
    }

    async fn list(&self) -> Result<Vec<Session>> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| ToolError::Storage(e.to_string()))?;
        let table = read_txn
            .open_table(SESSIONS)
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
