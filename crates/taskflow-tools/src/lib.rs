//! Taskflow Tools - concrete tool bodies implementing `taskflow_traits::tool::Tool`.
//!
//! Six named tools: `read`/`grep`/`glob` are
//! concurrency-safe; `write`/`edit` are unsafe and target-keyed by the path
//! they mutate; `bash` is unsafe with no identifiable target. A seventh,
//! `SpawnAgent`, is the Agent Registry's tool-facing seam: unsafe,
//! target-keyed per agent name, and excluded from
//! [`default_registry`] since it needs a live `SubagentManager` handle
//! that only exists once the full stack is wired up (see
//! `taskflow-cli::commands::run`).

pub mod bash;
pub mod edit;
pub mod glob;
pub mod grep;
pub mod read;
pub mod spawn_agent;
pub mod write;

pub use bash::BashTool;
pub use edit::EditTool;
pub use glob::GlobTool;
pub use grep::GrepTool;
pub use read::ReadTool;
pub use spawn_agent::SpawnAgentTool;
pub use write::WriteTool;

use std::sync::Arc;
use taskflow_traits::registry::ToolRegistry;

/// Builds a registry populated with all six tool bodies under their
/// canonical names, for callers (the CLI, tests) that want the full default
/// set without registering each tool individually.
pub fn default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(ReadTool::new());
    registry.register(WriteTool::new());
    registry.register(EditTool::new());
    registry.register(BashTool::new());
    registry.register(GrepTool::new());
    registry.register(GlobTool::new());
    registry
}

/// Same as [`default_registry`] but returns an `Arc` for direct use with
/// `ToolExecutor::from_registry`.
pub fn default_registry_arc() -> Arc<ToolRegistry> {
    Arc::new(default_registry())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_has_all_six_tools() {
        let registry = default_registry();
        for name in ["read", "write", "edit", "bash", "grep", "glob"] {
            assert!(registry.has(name), "missing tool: {name}");
        }
    }
}
