//! Taskflow Core - the four tightly coupled subsystems that constitute the
//! runtime's hard engineering: Agentic Loop, Tool Executor,
//! Work Loop / Task Manager, Agent Registry / Subagent Spawner. Also hosts
//! the Event Bus, Context Store & Compactor, runtime configuration, and the
//! agent-file loader these subsystems share.

pub mod agent_registry;
pub mod agentic_loop;
pub mod config;
pub mod context;
pub mod cron;
pub mod event_bus;
pub mod loader;
pub mod task_manager;
pub mod task_verifier;
pub mod tool_executor;
pub mod work_loop;

pub use agent_registry::{AgentRegistry, AgentRegistryError};
pub use agentic_loop::{
    AgenticLoop, LoopAgent, LoopHandle, LoopResult, LoopStopReason, LoopStreamChunk, RunConfig,
    StreamSink,
};
pub use config::{ConfigError, QueueModeConfig, RuntimeConfig};
pub use context::{BuildResult, ContextStore};
pub use cron::{CronService, CronServiceHandle};
pub use event_bus::InProcessEventBus;
pub use loader::{AgentDefinition, AgentOrigin, LoaderError};
pub use task_manager::{TaskManager, TaskManagerError};
pub use task_verifier::{TaskVerifier, VerifyOutcome};
pub use tool_executor::{ToolExecutor, ToolResultRecord, ToolUseRequest, UNKNOWN_TARGET_SENTINEL};
pub use work_loop::{WorkLoop, WorkLoopHandle};
