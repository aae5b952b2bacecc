//! Tool Executor: whitelist-gated, concurrency-grouped dispatch of a
//! batch of tool invocations, under a two-phase grouping rule — safe
//! calls run independently concurrent; unsafe calls are bucketed by
//! extracted target and each bucket runs its members sequentially, with
//! all buckets racing each other via `tokio::spawn` + `futures::future::join_all`.
//! Mirrors the source's spawn-then-await-all parallel dispatch shape but
//! replaces its flat semaphore pool with per-target buckets.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use serde_json::{Value, json};
use taskflow_contracts::message::ContentBlock;
use taskflow_traits::event::EventBus;
use taskflow_traits::registry::ToolRegistry;

pub const UNKNOWN_TARGET_SENTINEL: &str = "__unknown__";

#[derive(Debug, Clone)]
pub struct ToolUseRequest {
    pub id: String,
    pub name: String,
    pub input: Value,
}

#[derive(Debug, Clone)]
pub struct ToolResultRecord {
    pub tool_use_id: String,
    pub name: String,
    pub content: String,
    pub is_error: bool,
    pub duration_ms: u64,
}

/// Converts completed records into the `tool_result` content blocks the
/// agentic loop appends, in the original tool-use order.
pub fn to_content_blocks(records: &[ToolResultRecord]) -> Vec<ContentBlock> {
    records
        .iter()
        .map(|record| ContentBlock::ToolResult {
            tool_use_id: record.tool_use_id.clone(),
            content: record.content.clone(),
            is_error: record.is_error,
        })
        .collect()
}

pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    whitelist: HashSet<String>,
    events: Arc<dyn EventBus>,
}

impl ToolExecutor {
    /// A fresh executor per loop run — the whitelist is per-loop, never
    /// shared across runs.
    pub fn new(registry: Arc<ToolRegistry>, whitelist: Vec<String>, events: Arc<dyn EventBus>) -> Self {
        Self {
            registry,
            whitelist: whitelist.into_iter().collect(),
            events,
        }
    }

    /// Builds a whitelist from the registry's full tool set — used when no
    /// explicit allowed-tools list is configured.
    pub fn from_registry(registry: Arc<ToolRegistry>, events: Arc<dyn EventBus>) -> Self {
        let whitelist = registry.list().into_iter().map(str::to_string).collect();
        Self {
            registry,
            whitelist,
            events,
        }
    }

    pub fn allow(&mut self, name: impl Into<String>) {
        self.whitelist.insert(name.into());
    }

    pub fn disallow(&mut self, name: &str) {
        self.whitelist.remove(name);
    }

    pub async fn execute_all(&self, tool_uses: Vec<ToolUseRequest>) -> Vec<ToolResultRecord> {
        let ids: Vec<String> = tool_uses.iter().map(|t| t.id.clone()).collect();
        let names: Vec<String> = tool_uses.iter().map(|t| t.name.clone()).collect();
        let mut results: Vec<Option<ToolResultRecord>> = vec![None; tool_uses.len()];

        let mut runnable = Vec::new();
        for (idx, tool_use) in tool_uses.into_iter().enumerate() {
            if self.whitelist.contains(&tool_use.name) {
                runnable.push((idx, tool_use));
            } else {
                results[idx] = Some(ToolResultRecord {
                    tool_use_id: tool_use.id,
                    name: tool_use.name.clone(),
                    content: format!("Error: Tool '{}' is not allowed for this agent", tool_use.name),
                    is_error: true,
                    duration_ms: 0,
                });
            }
        }

        let mut safe = Vec::new();
        let mut unsafe_groups: HashMap<String, Vec<(usize, ToolUseRequest)>> = HashMap::new();
        for (idx, tool_use) in runnable {
            let tool = self.registry.get(&tool_use.name);
            let is_safe = tool.as_ref().is_some_and(|t| t.is_safe());
            if is_safe {
                safe.push((idx, tool_use));
            } else {
                let key = tool
                    .as_ref()
                    .map(|t| t.target_key(&tool_use.input))
                    .unwrap_or_else(|| UNKNOWN_TARGET_SENTINEL.to_string());
                unsafe_groups.entry(key).or_default().push((idx, tool_use));
            }
        }

        let mut handles = Vec::new();
        for (idx, tool_use) in safe {
            let registry = self.registry.clone();
            let events = self.events.clone();
            handles.push(tokio::spawn(async move {
                vec![(idx, run_one(&registry, &events, tool_use).await)]
            }));
        }
        for (_target, group) in unsafe_groups {
            let registry = self.registry.clone();
            let events = self.events.clone();
            handles.push(tokio::spawn(async move {
                let mut out = Vec::with_capacity(group.len());
                for (idx, tool_use) in group {
                    out.push((idx, run_one(&registry, &events, tool_use).await));
                }
                out
            }));
        }

        for group_results in futures::future::join_all(handles).await.into_iter().flatten() {
            for (idx, record) in group_results {
                results[idx] = Some(record);
            }
        }

        results
            .into_iter()
            .enumerate()
            .map(|(idx, record)| {
                record.unwrap_or_else(|| ToolResultRecord {
                    tool_use_id: ids[idx].clone(),
                    name: names[idx].clone(),
                    content: "Error: No result".to_string(),
                    is_error: true,
                    duration_ms: 0,
                })
            })
            .collect()
    }
}

async fn run_one(
    registry: &Arc<ToolRegistry>,
    events: &Arc<dyn EventBus>,
    tool_use: ToolUseRequest,
) -> ToolResultRecord {
    let start = Instant::now();
    events
        .emit(
            "tool:call",
            json!({"name": tool_use.name, "input": tool_use.input, "id": tool_use.id}),
        )
        .await;

    let (content, is_error) = match registry.execute(&tool_use.name, tool_use.input.clone()).await {
        Ok(output) => {
            let (_, content, is_error) = output.into_content(tool_use.id.clone());
            (content, is_error)
        }
        Err(err) => (format!("Error: {err}"), true),
    };
    let duration_ms = start.elapsed().as_millis() as u64;

    events
        .emit(
            "tool:result",
            json!({"id": tool_use.id, "result": content, "isError": is_error}),
        )
        .await;

    ToolResultRecord {
        tool_use_id: tool_use.id,
        name: tool_use.name,
        content,
        is_error,
        duration_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use taskflow_traits::error::Result;
    use taskflow_traits::tool::{Tool, ToolOutput};

    use crate::event_bus::InProcessEventBus;

    struct ReadStub;
    #[async_trait]
    impl Tool for ReadStub {
        fn name(&self) -> &str {
            "Read"
        }
        fn description(&self) -> &str {
            "reads a file"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type":"object"})
        }
        fn is_safe(&self) -> bool {
            true
        }
        async fn execute(&self, input: Value) -> Result<ToolOutput> {
            Ok(ToolOutput::success(json!({"path": input["path"]})))
        }
    }

    struct EditStub {
        log: Arc<Mutex<Vec<String>>>,
    }
    #[async_trait]
    impl Tool for EditStub {
        fn name(&self) -> &str {
            "Edit"
        }
        fn description(&self) -> &str {
            "edits a file"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type":"object"})
        }
        fn target_key(&self, input: &Value) -> String {
            input["file_path"].as_str().unwrap_or("__unknown__").to_string()
        }
        async fn execute(&self, input: Value) -> Result<ToolOutput> {
            let label = input["label"].as_str().unwrap_or_default().to_string();
            self.log.lock().unwrap().push(label);
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            Ok(ToolOutput::success(json!({"ok": true})))
        }
    }

    fn build_executor(log: Arc<Mutex<Vec<String>>>) -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(ReadStub);
        registry.register(EditStub { log });
        let registry = Arc::new(registry);
        let events = Arc::new(InProcessEventBus::new());
        ToolExecutor::from_registry(registry, events)
    }

    #[tokio::test]
    async fn rejects_tools_outside_the_whitelist() {
        let executor = ToolExecutor::new(
            Arc::new(ToolRegistry::new()),
            vec![],
            Arc::new(InProcessEventBus::new()),
        );
        let results = executor
            .execute_all(vec![ToolUseRequest {
                id: "1".to_string(),
                name: "Bash".to_string(),
                input: json!({}),
            }])
            .await;
        assert_eq!(results.len(), 1);
        assert!(results[0].is_error);
        assert!(results[0].content.contains("not allowed"));
        assert_eq!(results[0].duration_ms, 0);
    }

    #[tokio::test]
    async fn preserves_input_order_regardless_of_completion_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let executor = build_executor(log);
        let results = executor
            .execute_all(vec![
                ToolUseRequest {
                    id: "a".to_string(),
                    name: "Read".to_string(),
                    input: json!({"path": "/a"}),
                },
                ToolUseRequest {
                    id: "b".to_string(),
                    name: "Read".to_string(),
                    input: json!({"path": "/b"}),
                },
            ])
            .await;
        assert_eq!(results[0].tool_use_id, "a");
        assert_eq!(results[1].tool_use_id, "b");
    }

    #[tokio::test]
    async fn same_target_unsafe_calls_serialize() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let executor = build_executor(log.clone());
        let results = executor
            .execute_all(vec![
                ToolUseRequest {
                    id: "1".to_string(),
                    name: "Edit".to_string(),
                    input: json!({"file_path": "/f", "label": "first"}),
                },
                ToolUseRequest {
                    id: "2".to_string(),
                    name: "Edit".to_string(),
                    input: json!({"file_path": "/f", "label": "second"}),
                },
            ])
            .await;
        assert!(!results[0].is_error);
        assert!(!results[1].is_error);
        assert_eq!(*log.lock().unwrap(), vec!["first".to_string(), "second".to_string()]);
    }

    #[tokio::test]
    async fn unknown_tool_names_resolve_to_error_record() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry_holder = ToolRegistry::new();
        registry_holder.register(ReadStub);
        let registry = Arc::new(registry_holder);
        let events = Arc::new(InProcessEventBus::new());
        let mut executor = ToolExecutor::from_registry(registry, events);
        executor.allow("Ghost");
        let _ = log;
        let results = executor
            .execute_all(vec![ToolUseRequest {
                id: "1".to_string(),
                name: "Ghost".to_string(),
                input: json!({}),
            }])
            .await;
        assert!(results[0].is_error);
    }
}
