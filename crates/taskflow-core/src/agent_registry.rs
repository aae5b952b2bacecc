//! Agent Registry & Subagent Spawner: catalog of agent definitions,
//! bounded-depth subagent spawning, and orphan sweeping.
//!
//! Grounded on `restflow-core::runtime::subagent::spawn` (the oneshot
//! "don't start until registered" gate, `tokio::time::timeout` racing the
//! loop future, per-agent filtered tool registry construction) and
//! `restflow-core::runtime::subagent::definition` (the `SubagentDefLookup`
//! dependency-injection trait that breaks the registry/loop cycle).
//!
//! **Cyclic-reference resolution.** The Agent Registry needs
//! to run an `AgenticLoop`; the loop needs to call back into the registry
//! (as the `SpawnAgent` tool, implemented against `SubagentManager`). This
//! is resolved by dependency injection rather than a direct field: the
//! registry is configured with a [`LoopFactory`] closure that the caller
//! builds from the same shared `ContextStore`/`LlmProvider`/`ToolRegistry`/
//! `EventBus` the loop itself uses, so the registry never holds an `Arc`
//! back to the loop that contains it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::{Value, json};
use tracing::warn;

use taskflow_contracts::subagent::{SubagentRecord, SubagentStatus};
use taskflow_models::resolve_model;
use taskflow_traits::error::ToolError;
use taskflow_traits::event::EventBus;
use taskflow_traits::store::SubagentStore;
use taskflow_traits::subagent::{
    SpawnHandle, SpawnRequest, SubagentConfig, SubagentDefLookup, SubagentDefSnapshot,
    SubagentDefSummary, SubagentManager, SubagentResult,
};
use thiserror::Error;

use crate::agentic_loop::{AgenticLoop, LoopAgent, LoopHandle, LoopStopReason, LoopStreamChunk, RunConfig, StreamSink};
use crate::loader::AgentDefinition;

/// Lazily produces the shared agentic loop a subagent run is dispatched
/// through. A closure rather than a stored `Arc<AgenticLoop>` field, so the
/// registry never needs the loop to exist before it does.
pub type LoopFactory = Arc<dyn Fn() -> Arc<AgenticLoop> + Send + Sync>;

#[derive(Debug, Error)]
pub enum AgentRegistryError {
    #[error("agent not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] ToolError),
}

struct Definitions {
    order: Vec<String>,
    by_name: HashMap<String, AgentDefinition>,
}

impl Definitions {
    fn new() -> Self {
        Self {
            order: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    fn register(&mut self, def: AgentDefinition) {
        let name = def.name.clone();
        if !self.by_name.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.by_name.insert(name, def);
    }

    fn get(&self, name: &str) -> Option<AgentDefinition> {
        self.by_name.get(name).cloned()
    }

    fn list(&self) -> Vec<AgentDefinition> {
        self.order.iter().filter_map(|name| self.by_name.get(name).cloned()).collect()
    }
}

/// Shared mutable state, held behind an `Arc` so the detached task each
/// `spawn()` call starts can outlive the `&self` borrow that created it.
struct Inner {
    definitions: RwLock<Definitions>,
    store: Arc<dyn SubagentStore>,
    events: Arc<dyn EventBus>,
    config: SubagentConfig,
    running: RwLock<HashMap<String, SubagentRecord>>,
    completions: RwLock<HashMap<String, SubagentResult>>,
    notify: tokio::sync::Notify,
}

impl Inner {
    async fn finalize(&self, id: &str, status: SubagentStatus, result: Option<SubagentResult>, error: Option<String>) {
        let Some(mut record) = self.running.write().remove(id) else {
            return;
        };

        record.status = status;
        record.completed_at = Some(now_ms());
        if let Some(result) = &result {
            record.result = Some(result.output.clone());
            record.tokens_used = result.tokens_used.unwrap_or(0);
            record.tool_use_count = result.tool_use_count;
        }

        if let Err(err) = self.store.update(record).await {
            warn!(subagent_id = %id, error = %err, "failed to persist subagent finalization");
        }

        match status {
            SubagentStatus::Completed => {
                if let Some(result) = result {
                    self.events
                        .emit("subagent:complete", json!({"subagentId": id, "result": result}))
                        .await;
                    self.completions.write().insert(id.to_string(), result);
                }
            }
            SubagentStatus::Timeout => {
                self.events.emit("subagent:timeout", json!({"subagentId": id})).await;
                self.completions.write().insert(
                    id.to_string(),
                    SubagentResult {
                        success: false,
                        output: String::new(),
                        summary: None,
                        duration_ms: 0,
                        tokens_used: None,
                        tool_use_count: 0,
                        error: Some("timeout".to_string()),
                    },
                );
            }
            SubagentStatus::Failed => {
                if let Some(message) = &error {
                    warn!(subagent_id = %id, error = %message, "subagent failed");
                }
                self.completions.write().insert(
                    id.to_string(),
                    SubagentResult {
                        success: false,
                        output: String::new(),
                        summary: None,
                        duration_ms: 0,
                        tokens_used: None,
                        tool_use_count: 0,
                        error,
                    },
                );
            }
            SubagentStatus::Running => unreachable!("finalize is never called with Running"),
        }

        self.notify.notify_waiters();
    }

    fn stream_sink(self: &Arc<Self>, subagent_id: String) -> StreamSink {
        let events = self.events.clone();
        Arc::new(move |chunk: LoopStreamChunk| {
            let events = events.clone();
            let subagent_id = subagent_id.clone();
            tokio::spawn(async move {
                let value = serde_json::to_value(&chunk).unwrap_or(Value::Null);
                let type_field = value.get("type").cloned().unwrap_or(Value::Null);
                events
                    .emit(
                        "subagent:stream",
                        json!({"subagentId": subagent_id, "chunk": value, "type": type_field}),
                    )
                    .await;
            });
        })
    }
}

fn now_ms() -> i64 {
    taskflow_storage::now_ms()
}

pub struct AgentRegistry {
    inner: Arc<Inner>,
    loop_factory: LoopFactory,
}

impl AgentRegistry {
    pub fn new(store: Arc<dyn SubagentStore>, events: Arc<dyn EventBus>, config: SubagentConfig, loop_factory: LoopFactory) -> Self {
        Self {
            inner: Arc::new(Inner {
                definitions: RwLock::new(Definitions::new()),
                store,
                events,
                config,
                running: RwLock::new(HashMap::new()),
                completions: RwLock::new(HashMap::new()),
                notify: tokio::sync::Notify::new(),
            }),
            loop_factory,
        }
    }

    /// Register an agent definition, keyed by name. Duplicate registrations
    /// overwrite in place; listing stays in original insertion order.
    pub fn register(&self, definition: AgentDefinition) {
        self.inner.definitions.write().register(definition);
    }

    /// Scans running records whose `spawned_at + timeout_ms < now` and
    /// forcibly finalizes them as `timeout`. Covers runs whose detached
    /// task never got to race its own `tokio::time::timeout` (e.g. the
    /// process was asleep), not the common case.
    pub async fn check_timeouts(&self) {
        let now = now_ms();
        let stale: Vec<String> = self
            .inner
            .running
            .read()
            .iter()
            .filter(|(_, record)| record.spawned_at + record.timeout_ms as i64 <= now)
            .map(|(id, _)| id.clone())
            .collect();

        for id in stale {
            self.inner
                .finalize(&id, SubagentStatus::Timeout, None, Some("subagent exceeded its timeout".to_string()))
                .await;
        }
    }

    /// Durable cleanup path for running records left over a process
    /// restart — delegates to the store rather than the in-memory set.
    pub async fn mark_orphaned(&self, older_than_ms: i64) -> Result<Vec<SubagentRecord>, ToolError> {
        self.inner.store.mark_orphaned(older_than_ms).await
    }
}

impl SubagentDefLookup for AgentRegistry {
    fn lookup(&self, id: &str) -> Option<SubagentDefSnapshot> {
        let def = self.inner.definitions.read().get(id)?;
        Some(SubagentDefSnapshot {
            name: def.name,
            system_prompt: def.system_prompt,
            allowed_tools: def.allowed_tools,
            max_iterations: Some(self.inner.config.max_iterations as u32),
        })
    }

    fn list_callable(&self) -> Vec<SubagentDefSummary> {
        self.inner
            .definitions
            .read()
            .list()
            .into_iter()
            .map(|def| SubagentDefSummary {
                id: def.name.clone(),
                name: def.name,
                description: def.description,
                tags: Vec::new(),
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl SubagentManager for AgentRegistry {
    async fn spawn(&self, request: SpawnRequest) -> Result<SpawnHandle, ToolError> {
        let depth = request.depth.unwrap_or(0);
        if depth >= self.inner.config.max_depth {
            return Err(ToolError::Tool(format!(
                "Maximum subagent nesting depth ({}) exceeded",
                self.inner.config.max_depth
            )));
        }

        let definition = self
            .inner
            .definitions
            .read()
            .get(&request.agent_id)
            .ok_or_else(|| ToolError::NotFound(request.agent_id.clone()))?;

        let id = uuid::Uuid::new_v4().to_string();
        let timeout_ms = request.timeout_secs.unwrap_or(self.inner.config.subagent_timeout_secs) * 1000;

        let record = SubagentRecord::new(
            id.clone(),
            definition.name.clone(),
            request.task.clone(),
            request.parent_id.clone(),
            timeout_ms,
            now_ms(),
        );
        self.inner.store.create(record.clone()).await?;
        self.inner.running.write().insert(id.clone(), record);

        self.inner
            .events
            .emit(
                "subagent:spawn",
                json!({"subagentId": id, "agentName": definition.name, "parentId": request.parent_id}),
            )
            .await;

        // Model resolution has no meaningful "surrounding" model to inherit
        // from at spawn time (the parent's model isn't threaded through
        // SpawnRequest); `inherit` falls back to "default" the same way a
        // bare agent run would.
        let model = resolve_model(&definition.model, "default");

        let run_config = RunConfig {
            session_id: request.resume_session_id.clone(),
            tool_whitelist: None,
            max_iterations: self.inner.config.max_iterations as u32,
            timeout_ms: Some(timeout_ms),
            on_stream: Some(self.inner.stream_sink(id.clone())),
            agent: Some(LoopAgent {
                system_prompt: Some(definition.system_prompt.clone()),
                allowed_tools: definition.allowed_tools.clone(),
            }),
            model,
            ..RunConfig::default()
        };

        let inner = self.inner.clone();
        let loop_factory = self.loop_factory.clone();
        let task = request.task.clone();
        let resume_session_id = request.resume_session_id.clone();
        let subagent_id = id.clone();

        tokio::spawn(async move {
            let agentic_loop = loop_factory();
            let handle = LoopHandle::new();
            let timeout = Duration::from_millis(timeout_ms);

            let run_result = match &resume_session_id {
                Some(session_id) => {
                    tokio::time::timeout(timeout, agentic_loop.resume(&handle, session_id, &task, run_config)).await
                }
                None => tokio::time::timeout(timeout, agentic_loop.run(&handle, &task, run_config)).await,
            };

            match run_result {
                Ok(Ok(result)) => {
                    let interrupted = matches!(result.stop_reason, LoopStopReason::Interrupted);
                    let subagent_result = SubagentResult {
                        success: !interrupted,
                        output: result.response,
                        summary: None,
                        duration_ms: 0,
                        tokens_used: Some((result.tokens_used.input_tokens + result.tokens_used.output_tokens) as u64),
                        tool_use_count: result.tool_calls.len() as u32,
                        error: None,
                    };
                    inner.finalize(&subagent_id, SubagentStatus::Completed, Some(subagent_result), None).await;
                }
                Ok(Err(err)) => {
                    inner.finalize(&subagent_id, SubagentStatus::Failed, None, Some(err.to_string())).await;
                }
                Err(_elapsed) => {
                    inner
                        .finalize(&subagent_id, SubagentStatus::Timeout, None, Some("subagent exceeded its timeout".to_string()))
                        .await;
                }
            }
        });

        Ok(SpawnHandle {
            id,
            agent_name: definition.name,
        })
    }

    fn list_callable(&self) -> Vec<SubagentDefSummary> {
        SubagentDefLookup::list_callable(self)
    }

    fn list_running(&self) -> Vec<SubagentRecord> {
        self.inner.running.read().values().cloned().collect()
    }

    fn running_count(&self) -> usize {
        self.inner.running.read().len()
    }

    async fn wait(&self, id: &str) -> Option<SubagentResult> {
        loop {
            let notified = self.inner.notify.notified();
            if let Some(result) = self.inner.completions.write().remove(id) {
                return Some(result);
            }
            if !self.inner.running.read().contains_key(id) {
                return None;
            }
            notified.await;
        }
    }

    fn config(&self) -> &SubagentConfig {
        &self.inner.config
    }
}
