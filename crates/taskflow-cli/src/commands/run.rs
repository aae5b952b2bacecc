//! `taskflow run` — wires the four core subsystems together and starts
//! the Work Loop against a configuration file, grounded on
//! `restflow-cli::commands::start`'s daemon-bootstrap shape (build every
//! collaborator, start the loop, wait for Ctrl-C) reduced to a foreground
//! process with no daemonization.
//!
//! Resolves the Agent-Registry/Agentic-Loop cyclic reference the
//! way DESIGN.md describes: the Work Loop's top-level agentic loop gets a
//! tool registry that includes `SpawnAgent`, built from an already-spawned
//! `Arc<AgentRegistry>`; the registry's own `loop_factory` closure builds
//! *nested* agentic loops from a separate, `SpawnAgent`-free tool registry,
//! so no loop instance's construction ever depends on the registry's own
//! construction — there is no cycle to break, just two distinct registries
//! for two distinct nesting levels.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use taskflow_ai::{AnthropicProvider, MockProvider, RetryingProvider};
use taskflow_core::agent_registry::AgentRegistry;
use taskflow_core::config::RuntimeConfig;
use taskflow_core::context::ContextStore;
use taskflow_core::event_bus::InProcessEventBus;
use taskflow_core::loader::AgentOrigin;
use taskflow_core::task_manager::TaskManager;
use taskflow_core::task_verifier::TaskVerifier;
use taskflow_core::{AgentDefinition, AgenticLoop, WorkLoop};
use taskflow_storage::{JsonlArchivalSink, Storage};
use taskflow_tools::SpawnAgentTool;
use taskflow_traits::event::EventBus;
use taskflow_traits::llm::LlmProvider;
use taskflow_traits::registry::ToolRegistry;
use taskflow_traits::subagent::{SubagentConfig, SubagentManager};

const DEFAULT_GENERAL_AGENT_PROMPT: &str =
    "You are a general-purpose autonomous agent. Use the available tools to complete \
     the task you are given, then respond with your final answer.";

pub async fn run(config_path: Option<String>, db_path: &str) -> Result<()> {
    let config = RuntimeConfig::load(config_path.as_deref())?;
    let storage = Storage::open(db_path)?;
    let events: Arc<dyn EventBus> = Arc::new(InProcessEventBus::new());

    let context = Arc::new(ContextStore::new(
        storage.sessions.clone(),
        storage.messages.clone(),
        events.clone(),
    ));
    let tasks = Arc::new(TaskManager::new(storage.tasks.clone(), events.clone()));
    let provider = build_provider();

    let nested_tools: Arc<ToolRegistry> = Arc::new(taskflow_tools::default_registry());
    let loop_factory = {
        let context = context.clone();
        let provider = provider.clone();
        let nested_tools = nested_tools.clone();
        let events = events.clone();
        Arc::new(move || {
            Arc::new(AgenticLoop::new(
                context.clone(),
                provider.clone(),
                nested_tools.clone(),
                events.clone(),
            ))
        })
    };

    let agent_registry = Arc::new(AgentRegistry::new(
        storage.subagents.clone(),
        events.clone(),
        SubagentConfig::default(),
        loop_factory,
    ));
    agent_registry.register(AgentDefinition {
        name: "general".to_string(),
        description: "General-purpose fallback agent for ad-hoc delegated work".to_string(),
        model: "inherit".to_string(),
        allowed_tools: Vec::new(),
        color: None,
        system_prompt: DEFAULT_GENERAL_AGENT_PROMPT.to_string(),
        origin: AgentOrigin::Core,
    });
    load_persisted_agents(&agent_registry, &config.data_dir);

    let mut top_tools = taskflow_tools::default_registry();
    let manager: Arc<dyn SubagentManager> = agent_registry.clone();
    top_tools.register(SpawnAgentTool::new(manager, 0, None));

    let archival = Arc::new(JsonlArchivalSink::new(
        Path::new(&config.data_dir).join("sessions"),
    ));
    let agentic_loop = Arc::new(
        AgenticLoop::new(context, provider, Arc::new(top_tools), events.clone())
            .with_archival(archival),
    );

    let verifier = Arc::new(TaskVerifier::new(tasks.clone(), events.clone()));
    let _verify_subscription = verifier.subscribe();

    let work_loop = Arc::new(WorkLoop::new(tasks, agentic_loop, events, &config));
    let (handle, poll_task) = work_loop.start();

    info!(agent_id = %config.agent_id, "taskflow work loop started, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    handle.stop();
    let _ = poll_task.await;
    Ok(())
}

/// Loads every `*.md` agent file under `<data_dir>/agents`, logging and
/// skipping any that fail to parse rather than aborting startup.
fn load_persisted_agents(registry: &Arc<AgentRegistry>, data_dir: &str) {
    let agents_dir = Path::new(data_dir).join("agents");
    let Ok(entries) = std::fs::read_dir(&agents_dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("md") {
            continue;
        }
        match taskflow_core::loader::load_file(&path) {
            Ok(definition) => registry.register(definition),
            Err(err) => tracing::warn!(path = %path.display(), error = %err, "failed to load agent file"),
        }
    }
}

/// Anthropic if `ANTHROPIC_API_KEY` is set (wrapped in the rate-limit
/// retry decorator), otherwise a scripted mock so `run`
/// is exercisable without network credentials.
fn build_provider() -> Arc<dyn LlmProvider> {
    match std::env::var("ANTHROPIC_API_KEY") {
        Ok(key) if !key.is_empty() => {
            Arc::new(RetryingProvider::new(AnthropicProvider::new(key)))
        }
        _ => {
            tracing::warn!("ANTHROPIC_API_KEY not set; falling back to a scripted mock provider");
            Arc::new(MockProvider::new(Vec::new()))
        }
    }
}
