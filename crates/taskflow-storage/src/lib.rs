//! redb-backed implementations of the store ports defined in
//! `taskflow-traits::store`.
//!
//! Each store owns its own redb tables inside a shared `Database` handle,
//! keyed either by entity id (task, subagent, session) or by an ordered
//! per-session list of message ids.

mod jsonl;
mod message;
mod session;
mod subagent;
mod task;
mod time;

pub use jsonl::JsonlArchivalSink;
pub use message::RedbMessageStore;
pub use session::RedbSessionStore;
pub use subagent::RedbSubagentStore;
pub use task::RedbTaskStore;
pub use time::now_ms;

use std::sync::Arc;

use anyhow::Result;
use redb::Database;

/// Opens (creating if needed) the shared redb handle and the four stores
/// backed by it.
pub struct Storage {
    pub sessions: Arc<RedbSessionStore>,
    pub messages: Arc<RedbMessageStore>,
    pub tasks: Arc<RedbTaskStore>,
    pub subagents: Arc<RedbSubagentStore>,
}

impl Storage {
    pub fn open(path: &str) -> Result<Self> {
        let db = Arc::new(Database::create(path)?);
        Ok(Self {
            sessions: Arc::new(RedbSessionStore::new(db.clone())?),
            messages: Arc::new(RedbMessageStore::new(db.clone())?),
            tasks: Arc::new(RedbTaskStore::new(db.clone())?),
            subagents: Arc::new(RedbSubagentStore::new(db)?),
        })
    }
}
