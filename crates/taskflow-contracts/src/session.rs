//! Session record.

use serde::{Deserialize, Serialize};

/// Queue-mode discriminator. `Steer` allows mid-turn user interjections;
/// any other variant is opaque to the core and passed through verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueMode {
    Steer,
    Default,
}

impl Default for QueueMode {
    fn default() -> Self {
        Self::Default
    }
}

/// A conversation session. Created lazily on first access, mutated by the
/// agentic loop, never destroyed by the core (deletion is a store-level
/// operation, not a core one).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub created_at: i64,
    pub last_activity_at: i64,
    pub compaction_count: u32,
    pub total_tokens: u64,
    pub queue_mode: QueueMode,
    /// Opaque flags, round-tripped verbatim by stores.
    #[serde(default)]
    pub flags: serde_json::Map<String, serde_json::Value>,
}

impl Session {
    pub fn new(id: impl Into<String>, now: i64) -> Self {
        Self {
            id: id.into(),
            created_at: now,
            last_activity_at: now,
            compaction_count: 0,
            total_tokens: 0,
            queue_mode: QueueMode::Default,
            flags: serde_json::Map::new(),
        }
    }
}
