//! End-to-end coverage of the six concrete scenarios against a real,
//! temp-dir-backed `redb` store and an in-memory `MockProvider` — the
//! unit tests scattered across each subsystem module exercise these same
//! behaviors in isolation; this file wires the whole stack together the
//! way a caller (the CLI, a subagent spawn) actually would.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use taskflow_ai::llm::MockProvider;
use taskflow_contracts::task::TaskStatus;
use taskflow_core::{
    AgenticLoop, ContextStore, InProcessEventBus, LoopHandle, LoopStopReason, RunConfig,
    TaskManager, TaskVerifier, ToolExecutor, ToolUseRequest, WorkLoop,
};
use taskflow_core::config::RuntimeConfig;
use taskflow_storage::Storage;
use taskflow_traits::error::Result as ToolResult;
use taskflow_traits::event::EventBus;
use taskflow_traits::llm::{CompletionResult, ContentBlock as ProviderBlock, StopReason, Usage};
use taskflow_traits::registry::ToolRegistry;
use taskflow_traits::store::TaskCreate;
use taskflow_traits::tool::{Tool, ToolOutput};

fn open_storage(name: &str) -> Storage {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(name);
    std::mem::forget(dir);
    Storage::open(path.to_str().unwrap()).unwrap()
}

fn end_turn(text: &str) -> CompletionResult {
    CompletionResult {
        content: vec![ProviderBlock::Text { text: text.to_string() }],
        stop_reason: Some(StopReason::EndTurn),
        usage: Usage { input_tokens: 5, output_tokens: 5 },
    }
}

fn tool_use_turn(id: &str, name: &str, input: serde_json::Value) -> CompletionResult {
    CompletionResult {
        content: vec![ProviderBlock::ToolUse { id: id.to_string(), name: name.to_string(), input }],
        stop_reason: Some(StopReason::ToolUse),
        usage: Usage { input_tokens: 5, output_tokens: 5 },
    }
}

/// Scenario 1: a single turn with no tool use resolves in one round trip
/// and leaves exactly a user message and an assistant message behind.
#[tokio::test]
async fn scenario_single_math_turn() {
    let storage = open_storage("scenario1.redb");
    let bus: Arc<dyn EventBus> = Arc::new(InProcessEventBus::new());
    let context = Arc::new(ContextStore::new(storage.sessions.clone(), storage.messages.clone(), bus.clone()));
    let provider = Arc::new(MockProvider::new(vec![end_turn("4")]));
    let registry = Arc::new(ToolRegistry::new());
    let agentic_loop = AgenticLoop::new(context, provider, registry, bus);

    let handle = LoopHandle::new();
    let result = agentic_loop
        .run(&handle, "what is 2+2?", RunConfig::default())
        .await
        .unwrap();

    assert_eq!(result.stop_reason, LoopStopReason::EndTurn);
    assert_eq!(result.response, "4");

    let messages = storage.messages.list(&result.session_id).await.unwrap();
    assert_eq!(messages.len(), 2);
}

/// Scenario 2: a tool-use turn is followed by a completion turn, leaving
/// a four-message chain (user, assistant tool_use, user tool_result,
/// assistant text).
#[tokio::test]
async fn scenario_tool_use_then_completion() {
    struct ReadStub;
    #[async_trait]
    impl Tool for ReadStub {
        fn name(&self) -> &str {
            "Read"
        }
        fn description(&self) -> &str {
            "reads a file"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({"type": "object"})
        }
        fn is_safe(&self) -> bool {
            true
        }
        async fn execute(&self, input: serde_json::Value) -> ToolResult<ToolOutput> {
            Ok(ToolOutput::success(json!({"path": input["path"], "contents": "hello"})))
        }
    }

    let storage = open_storage("scenario2.redb");
    let bus: Arc<dyn EventBus> = Arc::new(InProcessEventBus::new());
    let context = Arc::new(ContextStore::new(storage.sessions.clone(), storage.messages.clone(), bus.clone()));
    let provider = Arc::new(MockProvider::new(vec![
        tool_use_turn("call-1", "Read", json!({"path": "/tmp/x"})),
        end_turn("the file says hello"),
    ]));
    let mut registry = ToolRegistry::new();
    registry.register(ReadStub);
    let agentic_loop = AgenticLoop::new(context, provider, Arc::new(registry), bus);

    let handle = LoopHandle::new();
    let result = agentic_loop
        .run(&handle, "what's in /tmp/x?", RunConfig::default())
        .await
        .unwrap();

    assert_eq!(result.stop_reason, LoopStopReason::EndTurn);
    assert_eq!(result.tool_calls.len(), 1);
    assert!(!result.tool_calls[0].is_error);

    let messages = storage.messages.list(&result.session_id).await.unwrap();
    assert_eq!(messages.len(), 4);
}

struct LoggingTool {
    name: &'static str,
    safe: bool,
    target: Option<&'static str>,
    log: Arc<std::sync::Mutex<Vec<String>>>,
}

#[async_trait]
impl Tool for LoggingTool {
    fn name(&self) -> &str {
        self.name
    }
    fn description(&self) -> &str {
        "test tool"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        json!({"type": "object"})
    }
    fn is_safe(&self) -> bool {
        self.safe
    }
    fn target_key(&self, input: &serde_json::Value) -> String {
        self.target
            .map(str::to_string)
            .unwrap_or_else(|| input["target"].as_str().unwrap_or("__unknown__").to_string())
    }
    async fn execute(&self, input: serde_json::Value) -> ToolResult<ToolOutput> {
        let label = input["label"].as_str().unwrap_or_default().to_string();
        self.log.lock().unwrap().push(label);
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        Ok(ToolOutput::success(json!({"ok": true})))
    }
}

/// Scenario 3: two safe tool calls with no shared target run concurrently
/// rather than being serialized — both complete and preserve call order
/// in the result vector regardless of actual completion order.
#[tokio::test]
async fn scenario_concurrent_safe_tools_run_in_parallel() {
    let log = Arc::new(std::sync::Mutex::new(Vec::new()));
    let mut registry = ToolRegistry::new();
    registry.register(LoggingTool { name: "SafeOne", safe: true, target: None, log: log.clone() });
    registry.register(LoggingTool { name: "SafeTwo", safe: true, target: None, log: log.clone() });
    let events = Arc::new(InProcessEventBus::new());
    let executor = ToolExecutor::from_registry(Arc::new(registry), events);

    let start = std::time::Instant::now();
    let results = executor
        .execute_all(vec![
            ToolUseRequest { id: "1".to_string(), name: "SafeOne".to_string(), input: json!({"label": "one"}) },
            ToolUseRequest { id: "2".to_string(), name: "SafeTwo".to_string(), input: json!({"label": "two"}) },
        ])
        .await;
    let elapsed = start.elapsed();

    assert!(!results[0].is_error);
    assert!(!results[1].is_error);
    assert_eq!(results[0].tool_use_id, "1");
    assert_eq!(results[1].tool_use_id, "2");
    assert_eq!(log.lock().unwrap().len(), 2);
    // Two 10ms sleeps running concurrently finish well under their sum.
    assert!(elapsed.as_millis() < 50, "safe tools should overlap, took {elapsed:?}");
}

/// Scenario 4: two unsafe calls sharing a target key run serialized in
/// submission order even though unsafe groups race each other.
#[tokio::test]
async fn scenario_unsafe_same_target_calls_serialize() {
    let log = Arc::new(std::sync::Mutex::new(Vec::new()));
    let mut registry = ToolRegistry::new();
    registry.register(LoggingTool { name: "Edit", safe: false, target: Some("/shared/file"), log: log.clone() });
    let events = Arc::new(InProcessEventBus::new());
    let executor = ToolExecutor::from_registry(Arc::new(registry), events);

    let results = executor
        .execute_all(vec![
            ToolUseRequest { id: "1".to_string(), name: "Edit".to_string(), input: json!({"label": "first"}) },
            ToolUseRequest { id: "2".to_string(), name: "Edit".to_string(), input: json!({"label": "second"}) },
        ])
        .await;

    assert!(!results[0].is_error);
    assert!(!results[1].is_error);
    assert_eq!(*log.lock().unwrap(), vec!["first".to_string(), "second".to_string()]);
}

/// Scenario 5: a work loop with `max_concurrent_tasks = 1` dispatches one
/// task, runs it to completion, and the running set empties back out.
#[tokio::test]
async fn scenario_work_loop_respects_budget_of_one() {
    let storage = open_storage("scenario5.redb");
    let bus: Arc<dyn EventBus> = Arc::new(InProcessEventBus::new());
    let context = Arc::new(ContextStore::new(storage.sessions.clone(), storage.messages.clone(), bus.clone()));
    let provider = Arc::new(MockProvider::new(vec![end_turn("done"), end_turn("done too")]));
    let agentic_loop = Arc::new(AgenticLoop::new(context, provider, Arc::new(ToolRegistry::new()), bus.clone()));
    let tasks = Arc::new(TaskManager::new(storage.tasks.clone(), bus.clone()));

    let mut config = RuntimeConfig::default();
    config.max_concurrent_tasks = 1;
    config.work_budget_max_tasks_per_hour = 1;
    let work_loop = Arc::new(WorkLoop::new(tasks.clone(), agentic_loop, bus, &config));

    let first = tasks
        .create(TaskCreate {
            subject: "first task".to_string(),
            description: "say something".to_string(),
            active_form: None,
            owner: None,
            blocked_by: Vec::new(),
            metadata: serde_json::Map::new(),
            time_budget_ms: None,
            verify_command: None,
        })
        .await
        .unwrap();
    let second = tasks
        .create(TaskCreate {
            subject: "second task".to_string(),
            description: "say something else".to_string(),
            active_form: None,
            owner: None,
            blocked_by: Vec::new(),
            metadata: serde_json::Map::new(),
            time_budget_ms: None,
            verify_command: None,
        })
        .await
        .unwrap();

    work_loop.poll().await;
    assert_eq!(work_loop.running_count().await, 1);

    for _ in 0..100 {
        if work_loop.running_count().await == 0 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(work_loop.running_count().await, 0);

    // The hourly budget of one dispatch was spent on the first poll; the
    // second task stays pending even though a slot is free.
    work_loop.poll().await;
    assert_eq!(work_loop.running_count().await, 0);

    let first_after = tasks.get(&first.id).await.unwrap().unwrap();
    assert_eq!(first_after.status, TaskStatus::Completed);
    let second_after = tasks.get(&second.id).await.unwrap().unwrap();
    assert_eq!(second_after.status, TaskStatus::Pending);
}

/// Scenario 6: a failing verify command retries the task up to the
/// configured maximum, then leaves it failed.
#[tokio::test]
async fn scenario_verification_retries_until_exhausted() {
    let storage = open_storage("scenario6.redb");
    let events: Arc<dyn EventBus> = Arc::new(InProcessEventBus::new());
    let tasks = Arc::new(TaskManager::new(storage.tasks.clone(), events.clone()));
    let verifier = TaskVerifier::new(tasks.clone(), events).with_max_retries(2);

    let task = tasks
        .create(TaskCreate {
            subject: "flaky build".to_string(),
            description: String::new(),
            active_form: None,
            owner: None,
            blocked_by: Vec::new(),
            metadata: serde_json::Map::new(),
            time_budget_ms: None,
            verify_command: Some("exit 1".to_string()),
        })
        .await
        .unwrap();
    tasks.claim(&task.id, "work-loop").await.unwrap();
    tasks
        .update(
            &task.id,
            taskflow_traits::store::TaskUpdate {
                status: Some(TaskStatus::Completed),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let mut retry_count = 0;
    for _ in 0..3 {
        let outcome = verifier.verify(&task.id, "exit 1", retry_count).await;
        match outcome {
            taskflow_core::VerifyOutcome::Failed { retried, .. } => {
                if !retried {
                    break;
                }
                retry_count += 1;
                // Re-claim and re-complete the retried task to mimic the
                // work loop picking it back up, same as a real retry cycle.
                tasks.claim(&task.id, "work-loop").await.unwrap();
                tasks
                    .update(
                        &task.id,
                        taskflow_traits::store::TaskUpdate {
                            status: Some(TaskStatus::Completed),
                            ..Default::default()
                        },
                    )
                    .await
                    .unwrap();
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    assert_eq!(retry_count, 2, "verifier should retry exactly max_retries times before giving up");
    let final_task = tasks.get(&task.id).await.unwrap().unwrap();
    assert_eq!(final_task.status, TaskStatus::Failed);
    assert_eq!(final_task.retry_count, 3);
}
