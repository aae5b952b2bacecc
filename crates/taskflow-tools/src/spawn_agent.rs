//! `SpawnAgent`: the one tool body that lets a running agentic loop spawn
//! a bounded-depth subagent through the Agent Registry, without this crate
//! depending on `taskflow-core` directly.
//!
//! Spec.md §9's cyclic-reference note resolves this exact seam: the
//! registry needs to run loops, and a loop needs to call the registry back
//! as a tool. Here that's a closure capture — this tool holds only the
//! `Arc<dyn SubagentManager>` trait object (defined in `taskflow-traits`),
//! built by whoever wires the full stack together (the CLI's `run`
//! command) after both the registry and the tool registry exist, rather
//! than either crate importing the other.
//!
//! Unlike `read`/`write`/etc., this tool blocks on `wait()` until the
//! subagent finishes (or the registry's own timeout race finalizes it),
//! so the parent loop's tool_result carries the subagent's actual answer
//! instead of a bare spawn acknowledgement.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use taskflow_traits::error::{Result, ToolError};
use taskflow_traits::subagent::{SpawnRequest, SubagentManager};
use taskflow_traits::tool::{Tool, ToolOutput};

pub struct SpawnAgentTool {
    manager: Arc<dyn SubagentManager>,
    /// Depth of the loop this tool is registered into; every spawn through
    /// this instance is one level deeper than its own caller.
    depth: usize,
    parent_id: Option<String>,
}

impl SpawnAgentTool {
    pub fn new(manager: Arc<dyn SubagentManager>, depth: usize, parent_id: Option<String>) -> Self {
        Self {
            manager,
            depth,
            parent_id,
        }
    }
}

#[async_trait]
impl Tool for SpawnAgentTool {
    fn name(&self) -> &str {
        "SpawnAgent"
    }

    fn description(&self) -> &str {
        "Delegate a self-contained task to a named subagent and wait for its result. \
         Use for well-scoped work that benefits from a fresh context window."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "agent": {"type": "string", "description": "Name of the agent definition to run"},
                "task": {"type": "string", "description": "The task description to hand the subagent"},
                "timeout_secs": {"type": "integer", "description": "Optional timeout override in seconds"}
            },
            "required": ["agent", "task"]
        })
    }

    async fn execute(&self, input: Value) -> Result<ToolOutput> {
        let agent_id = match input.get("agent").and_then(Value::as_str) {
            Some(v) => v.to_string(),
            None => return Ok(ToolOutput::error("missing required field 'agent'")),
        };
        let task = match input.get("task").and_then(Value::as_str) {
            Some(v) => v.to_string(),
            None => return Ok(ToolOutput::error("missing required field 'task'")),
        };
        let timeout_secs = input.get("timeout_secs").and_then(Value::as_u64);

        let handle = match self
            .manager
            .spawn(SpawnRequest {
                agent_id,
                task,
                timeout_secs,
                parent_id: self.parent_id.clone(),
                depth: Some(self.depth),
                resume_session_id: None,
            })
            .await
        {
            Ok(handle) => handle,
            Err(ToolError::Tool(msg)) => return Ok(ToolOutput::error(msg)),
            Err(ToolError::NotFound(name)) => {
                return Ok(ToolOutput::error(format!("unknown agent: {name}")));
            }
            Err(err) => return Err(err),
        };

        match self.manager.wait(&handle.id).await {
            Some(result) if result.success => Ok(ToolOutput::success(json!({
                "subagentId": handle.id,
                "agent": handle.agent_name,
                "output": result.output,
                "toolUseCount": result.tool_use_count,
            }))),
            Some(result) => Ok(ToolOutput::error(
                result.error.unwrap_or_else(|| "subagent failed".to_string()),
            )),
            None => Ok(ToolOutput::error(format!(
                "subagent {} finished without a recorded result",
                handle.id
            ))),
        }
    }

    fn is_safe(&self) -> bool {
        false
    }

    fn target_key(&self, input: &Value) -> String {
        input
            .get("agent")
            .and_then(Value::as_str)
            .map(|a| format!("subagent:{a}"))
            .unwrap_or_else(|| "__unknown__".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use taskflow_contracts::subagent::SubagentRecord;
    use taskflow_traits::subagent::{SubagentConfig, SubagentResult, SpawnHandle, SubagentDefSummary};

    struct StubManager {
        spawned: Mutex<Vec<SpawnRequest>>,
        result: Option<SubagentResult>,
        config: SubagentConfig,
    }

    #[async_trait]
    impl SubagentManager for StubManager {
        async fn spawn(&self, request: SpawnRequest) -> std::result::Result<SpawnHandle, ToolError> {
            let agent_id = request.agent_id.clone();
            self.spawned.lock().unwrap().push(request);
            if agent_id == "ghost" {
                return Err(ToolError::NotFound(agent_id));
            }
            Ok(SpawnHandle {
                id: "sub-1".to_string(),
                agent_name: agent_id,
            })
        }

        fn list_callable(&self) -> Vec<SubagentDefSummary> {
            Vec::new()
        }

        fn list_running(&self) -> Vec<SubagentRecord> {
            Vec::new()
        }

        fn running_count(&self) -> usize {
            0
        }

        async fn wait(&self, _id: &str) -> Option<SubagentResult> {
            self.result.clone()
        }

        fn config(&self) -> &SubagentConfig {
            &self.config
        }
    }

    fn tool_with(result: Option<SubagentResult>) -> SpawnAgentTool {
        let manager: Arc<dyn SubagentManager> = Arc::new(StubManager {
            spawned: Mutex::new(Vec::new()),
            result,
            config: SubagentConfig::default(),
        });
        SpawnAgentTool::new(manager, 1, Some("parent-1".to_string()))
    }

    #[tokio::test]
    async fn successful_spawn_surfaces_subagent_output() {
        let tool = tool_with(Some(SubagentResult {
            success: true,
            output: "done".to_string(),
            summary: None,
            duration_ms: 10,
            tokens_used: Some(42),
            tool_use_count: 2,
            error: None,
        }));
        let output = tool
            .execute(json!({"agent": "worker", "task": "do the thing"}))
            .await
            .unwrap();
        assert!(output.success);
        assert_eq!(output.result["output"], "done");
    }

    #[tokio::test]
    async fn failed_subagent_surfaces_error() {
        let tool = tool_with(Some(SubagentResult {
            success: false,
            output: String::new(),
            summary: None,
            duration_ms: 10,
            tokens_used: None,
            tool_use_count: 0,
            error: Some("ran out of budget".to_string()),
        }));
        let output = tool
            .execute(json!({"agent": "worker", "task": "do the thing"}))
            .await
            .unwrap();
        assert!(!output.success);
        assert_eq!(output.error.as_deref(), Some("ran out of budget"));
    }

    #[tokio::test]
    async fn unknown_agent_is_a_tool_error_not_a_rust_error() {
        let tool = tool_with(None);
        let output = tool
            .execute(json!({"agent": "ghost", "task": "do the thing"}))
            .await
            .unwrap();
        assert!(!output.success);
    }

    #[tokio::test]
    async fn missing_task_field_is_rejected() {
        let tool = tool_with(None);
        let output = tool.execute(json!({"agent": "worker"})).await.unwrap();
        assert!(!output.success);
    }

    #[test]
    fn target_key_is_scoped_per_agent() {
        let tool = tool_with(None);
        assert_eq!(tool.target_key(&json!({"agent": "worker"})), "subagent:worker");
        assert_eq!(tool.target_key(&json!({})), "__unknown__");
    }
}
