use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use taskflow_contracts::message::Message;
use taskflow_traits::error::{Result, ToolError};
use taskflow_traits::store::{ChainValidity, MessageCreate, MessageStore};

const MESSAGES: TableDefinition<&str, &[u8]> = TableDefinition::new("messages");
/// `session_id` -> JSON array of message ids in append order.
const SESSION_ORDER: TableDefinition<&str, &[u8]> = TableDefinition::new("session_message_order");

/// redb-backed `MessageStore`. Messages are keyed by id; a side table
/// records each session's append order so `list` doesn't need a table
/// scan.
pub struct RedbMessageStore {
    db: Arc<Database>,
}

impl RedbMessageStore {
    pub fn new(db: Arc<Database>) -> anyhow::Result<Self> {
        let write_txn = db.begin_write()?;
        write_txn.open_table(MESSAGES)?;
        write_txn.open_table(SESSION_ORDER)?;
        write_txn.commit()?;
        Ok(Self { db })
    }

    fn order(&self, session_id: &str) -> Result<Vec<String>> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| ToolError::Storage(e.to_string()))?;
        let table = read_txn
            .open_table(SESSION_ORDER)
            .map_err(|e| ToolError::Storage(e.to_string()))?;
        match table
            .get(session_id)
            .map_err(|e| ToolError::Storage(e.to_string()))?
        {
            Some(v) => Ok(serde_json::from_slice(v.value())?),
            None => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl MessageStore for RedbMessageStore {
    async fn create(&self, session_id: &str, input: MessageCreate) -> Result<Message> {
        let message = Message {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            parent_id: input.parent_id,
            role: input.role,
            content: input.content,
            created_at: input.created_at,
            token_count: input.token_count,
        };

        let mut order = self.order(session_id)?;
        order.push(message.id.clone());

        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| ToolError::Storage(e.to_string()))?;
        {
            let mut messages = write_txn
                .open_table(MESSAGES)
                .map_err(|e| ToolError::Storage(e.to_string()))?;
            let bytes = serde_json::to_vec(&message)?;
            messages
                .insert(message.id.as_str(), bytes.as_slice())
                .map_err(|e| ToolError::Storage(e.to_string()))?;

            let mut orders = write_txn
                .open_table(SESSION_ORDER)
                .map_err(|e| ToolError::Storage(e.to_string()))?;
            let order_bytes = serde_json::to_vec(&order)?;
            orders
                .insert(session_id, order_bytes.as_slice())
                .map_err(|e| ToolError::Storage(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| ToolError::Storage(e.to_string()))?;

        Ok(message)
    }

    async fn list(&self, session_id: &str) -> Result<Vec<Message>> {
        let order = self.order(session_id)?;
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| ToolError::Storage(e.to_string()))?;
        let table = read_txn
            .open_table(MESSAGES)
            .map_err(|e| ToolError::Storage(e.to_string()))?;
        let mut out = Vec::with_capacity(order.len());
        for id in order {
            if let Some(value) = table
                .get(id.as_str())
                .map_err(|e| ToolError::Storage(e.to_string()))?
            {
                out.push(serde_json::from_slice(value.value())?);
            }
        }
        Ok(out)
    }

    async fn get_token_count(&self, session_id: &str) -> Result<u64> {
        let messages = self.list(session_id).await?;
        Ok(messages
            .iter()
            .map(|m| m.token_count.unwrap_or(0) as u64)
            .sum())
    }

    async fn delete_session(&self, session_id: &str) -> Result<()> {
        let order = self.order(session_id)?;
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| ToolError::Storage(e.to_string()))?;
        {
            let mut messages = write_txn
                .open_table(MESSAGES)
                .map_err(|e| ToolError::Storage(e.to_string()))?;
            for id in order {
                messages
                    .remove(id.as_str())
                    .map_err(|e| ToolError::Storage(e.to_string()))?;
            }
            let mut orders = write_txn
                .open_table(SESSION_ORDER)
                .map_err(|e| ToolError::Storage(e.to_string()))?;
            orders
                .remove(session_id)
                .map_err(|e| ToolError::Storage(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| ToolError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn validate_chain(&self, session_id: &str) -> Result<ChainValidity> {
        let messages = self.list(session_id).await?;
        let seen: std::collections::HashSet<&str> =
            messages.iter().map(|m| m.id.as_str()).collect();
        for message in &messages {
            if let Some(parent) = &message.parent_id
                && !seen.contains(parent.as_str())
            {
                return Ok(ChainValidity {
                    valid: false,
                    broken_at: Some(message.id.clone()),
                });
            }
        }
        Ok(ChainValidity {
            valid: true,
            broken_at: None,
        })
    }
}
