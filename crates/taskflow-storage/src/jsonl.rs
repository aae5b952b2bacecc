//! Best-effort JSONL session archival, consumed through
//! `taskflow_traits::archival::TurnArchivalSink`.
//!
//! Grounded on `restflow-core::runtime::background_agent::event_log::EventLog`:
//! one append-only file per session under a log directory, opened with
//! `create().append(true)`, one JSON object per line, flushed after every
//! write. Unlike the source's `EventLog` (which logs structured per-step
//! agent events), this sink archives the session's full message list as a
//! single trailing snapshot line per turn — the unit the agentic loop's
//! FINALIZE step actually has in hand.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use taskflow_contracts::message::Message;
use taskflow_traits::archival::TurnArchivalSink;

#[derive(Serialize)]
struct TurnRecord<'a> {
    session_id: &'a str,
    archived_at_ms: i64,
    messages: &'a [Message],
}

/// Writes one line per archived turn to `<log_dir>/<session_id>.jsonl`.
pub struct JsonlArchivalSink {
    log_dir: PathBuf,
}

impl JsonlArchivalSink {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
        }
    }

    fn session_log_path(&self, session_id: &str) -> PathBuf {
        self.log_dir.join(format!("{session_id}.jsonl"))
    }
}

#[async_trait]
impl TurnArchivalSink for JsonlArchivalSink {
    async fn persist_turn(&self, session_id: &str, messages: &[Message]) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.log_dir).await?;
        let path = self.session_log_path(session_id);
        let record = TurnRecord {
            session_id,
            archived_at_ms: crate::now_ms(),
            messages,
        };
        let line = serde_json::to_string(&record)?;
        let mut file = OpenOptions::new().create(true).append(true).open(&path).await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        Ok(())
    }
}
