//! Agent-file loader: parses the frontmatter-delimited markdown agent
//! format into [`AgentDefinition`]s. The core treats the result
//! as an opaque definition; this module owns the one format detail
//! (frontmatter delimiters, required/optional keys) the registry doesn't
//! need to know about.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Where an agent definition came from. `Core` ships with the binary;
/// `Persisted` was loaded from disk; `Dynamic` was registered at runtime;
/// plugin-sourced definitions carry their plugin id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "plugin_id")]
pub enum AgentOrigin {
    Core,
    Persisted,
    Dynamic,
    Plugin(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub name: String,
    pub description: String,
    /// `inherit`, a named alias (`sonnet`/`opus`/`haiku`), or a literal
    /// model id. Defaults to `inherit` when omitted.
    pub model: String,
    /// Empty means "all tools allowed".
    pub allowed_tools: Vec<String>,
    pub color: Option<String>,
    pub system_prompt: String,
    pub origin: AgentOrigin,
}

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("agent file has no frontmatter delimiters")]
    MissingFrontmatter,
    #[error("invalid frontmatter: {0}")]
    InvalidFrontmatter(#[from] serde_yaml::Error),
    #[error("agent name {0:?} doesn't match [a-z][a-z0-9-]{{2,49}}")]
    InvalidName(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Deserialize)]
struct Frontmatter {
    name: String,
    description: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    tools: Vec<String>,
    #[serde(default)]
    color: Option<String>,
}

fn is_valid_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    if !(3..=50).contains(&bytes.len()) {
        return false;
    }
    if !bytes[0].is_ascii_lowercase() {
        return false;
    }
    bytes
        .iter()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
}

/// Parses a single agent-file's contents (frontmatter body, delimited by
/// `---` lines, then the system prompt) into a definition with the given
/// origin.
pub fn parse(contents: &str, origin: AgentOrigin) -> Result<AgentDefinition, LoaderError> {
    let trimmed = contents.trim_start();
    let rest = trimmed
        .strip_prefix("---")
        .ok_or(LoaderError::MissingFrontmatter)?;
    let end = rest.find("\n---").ok_or(LoaderError::MissingFrontmatter)?;
    let frontmatter_text = &rest[..end];
    let body = rest[end + 4..].trim_start_matches('\n').to_string();

    let frontmatter: Frontmatter = serde_yaml::from_str(frontmatter_text)?;

    if !is_valid_name(&frontmatter.name) {
        return Err(LoaderError::InvalidName(frontmatter.name));
    }

    Ok(AgentDefinition {
        name: frontmatter.name,
        description: frontmatter.description,
        model: frontmatter.model.unwrap_or_else(|| "inherit".to_string()),
        allowed_tools: frontmatter.tools,
        color: frontmatter.color,
        system_prompt: body,
        origin,
    })
}

/// Reads and parses an agent file from disk, origin `Persisted`.
pub fn load_file(path: &Path) -> Result<AgentDefinition, LoaderError> {
    let contents = std::fs::read_to_string(path).map_err(|source| LoaderError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse(&contents, AgentOrigin::Persisted)
}

/// Reads `AGENT.md` under `data_dir`, returning its contents formatted as
/// the INIT-step project-context block, or `None` if it doesn't exist.
/// Caller is expected to cache the result per loop builder.
pub fn load_project_context(data_dir: &Path) -> Option<String> {
    let path = data_dir.join("AGENT.md");
    let content = std::fs::read_to_string(path).ok()?;
    Some(format!(
        "--- Project Context (AGENT.md) ---\n{content}\n---"
    ))
}

/// Serializes a definition back to frontmatter-delimited text — the other
/// half of the parse/serialize round trip.
pub fn serialize(def: &AgentDefinition) -> String {
    let mut frontmatter = format!("name: {}\ndescription: {}\n", def.name, def.description);
    if def.model != "inherit" {
        frontmatter.push_str(&format!("model: {}\n", def.model));
    }
    if !def.allowed_tools.is_empty() {
        frontmatter.push_str("tools:\n");
        for tool in &def.allowed_tools {
            frontmatter.push_str(&format!("  - {tool}\n"));
        }
    }
    if let Some(color) = &def.color {
        frontmatter.push_str(&format!("color: {color}\n"));
    }
    format!("---\n{frontmatter}---\n{}", def.system_prompt)
}
