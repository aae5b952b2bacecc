//! Turn archival sink: a thin best-effort interface for recording a
//! session's messages as they're finalized. The agentic loop's FINALIZE
//! step calls this after every turn; failures are logged, never
//! propagated (archival is not part of the control flow).

use async_trait::async_trait;

use taskflow_contracts::message::Message;

#[async_trait]
pub trait TurnArchivalSink: Send + Sync {
    async fn persist_turn(&self, session_id: &str, messages: &[Message]) -> anyhow::Result<()>;
}

/// Default sink used wherever no concrete archival backend is wired in.
pub struct NoopArchivalSink;

#[async_trait]
impl TurnArchivalSink for NoopArchivalSink {
    async fn persist_turn(&self, _session_id: &str, _messages: &[Message]) -> anyhow::Result<()> {
        Ok(())
    }
}
