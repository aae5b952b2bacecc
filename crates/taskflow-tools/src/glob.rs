//! Glob tool: list directory entries under a path, optionally filtered by
//! a glob pattern. Concurrency safe (read-only).
//!
//! Grounded in `restflow-tools`'s `FileTool::list_dir`/`list_recursive`, with
//! pattern matching delegated to the `glob-match` crate instead of a
//! hand-rolled matcher.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use tokio::fs;

use taskflow_traits::error::Result;
use taskflow_traits::tool::{Tool, ToolOutput};

const MAX_ENTRIES: usize = 1000;

#[derive(Debug, Deserialize)]
struct GlobInput {
    path: String,
    #[serde(default)]
    pattern: Option<String>,
    #[serde(default)]
    recursive: bool,
}

#[derive(Default)]
pub struct GlobTool;

impl GlobTool {
    pub fn new() -> Self {
        Self
    }

    fn list_recursive<'a>(
        &'a self,
        dir: &'a Path,
        entries: &'a mut Vec<Value>,
        pattern: Option<&'a str>,
        base: &'a Path,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            if entries.len() >= MAX_ENTRIES {
                return;
            }

            let mut read_dir = match fs::read_dir(dir).await {
                Ok(rd) => rd,
                Err(_) => return,
            };

            while let Ok(Some(entry)) = read_dir.next_entry().await {
                if entries.len() >= MAX_ENTRIES {
                    break;
                }

                let name = entry.file_name().to_string_lossy().to_string();
                let entry_path = entry.path();
                let relative = entry_path.strip_prefix(base).unwrap_or(&entry_path).to_string_lossy().to_string();

                let file_type = match entry.file_type().await {
                    Ok(ft) => {
                        if ft.is_dir() {
                            "dir"
                        } else if ft.is_symlink() {
                            "symlink"
                        } else {
                            "file"
                        }
                    }
                    Err(_) => "unknown",
                };

                let matched = match pattern {
                    Some(p) => glob_match::glob_match(p, &name) || glob_match::glob_match(p, &relative),
                    None => true,
                };

                if matched {
                    let size = entry.metadata().await.ok().map(|m| m.len());
                    entries.push(serde_json::json!({
                        "path": relative,
                        "name": name,
                        "type": file_type,
                        "size": size,
                    }));
                }

                if file_type == "dir" {
                    self.list_recursive(&entry_path, entries, pattern, base).await;
                }
            }
        })
    }
}

#[async_trait]
impl Tool for GlobTool {
    fn name(&self) -> &str {
        "glob"
    }

    fn description(&self) -> &str {
        "List directory entries under a path, optionally filtered by a glob pattern."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Directory to list"},
                "pattern": {"type": "string", "description": "Glob pattern to filter entries"},
                "recursive": {"type": "boolean", "description": "List directories recursively"}
            },
            "required": ["path"]
        })
    }

    fn is_safe(&self) -> bool {
        true
    }

    async fn execute(&self, input: Value) -> Result<ToolOutput> {
        let input: GlobInput = serde_json::from_value(input)?;
        let path = std::path::Path::new(&input.path);

        if !path.exists() {
            return Ok(ToolOutput::error(format!("Directory not found: {}", path.display())));
        }
        if !path.is_dir() {
            return Ok(ToolOutput::error(format!("Not a directory: {}", path.display())));
        }

        let mut entries = Vec::new();

        if input.recursive {
            self.list_recursive(path, &mut entries, input.pattern.as_deref(), path).await;
        } else {
            let mut read_dir = match fs::read_dir(path).await {
                Ok(rd) => rd,
                Err(e) => return Ok(ToolOutput::error(format!("Cannot read directory: {e}"))),
            };

            while let Ok(Some(entry)) = read_dir.next_entry().await {
                if entries.len() >= MAX_ENTRIES {
                    break;
                }
                let name = entry.file_name().to_string_lossy().to_string();
                if let Some(p) = &input.pattern
                    && !glob_match::glob_match(p, &name)
                {
                    continue;
                }
                let file_type = match entry.file_type().await {
                    Ok(ft) => {
                        if ft.is_dir() {
                            "dir"
                        } else if ft.is_symlink() {
                            "symlink"
                        } else {
                            "file"
                        }
                    }
                    Err(_) => "unknown",
                };
                let size = entry.metadata().await.ok().map(|m| m.len());
                entries.push(serde_json::json!({"name": name, "type": file_type, "size": size}));
            }
        }

        let truncated = entries.len() >= MAX_ENTRIES;

        Ok(ToolOutput::success(serde_json::json!({
            "path": path.display().to_string(),
            "count": entries.len(),
            "truncated": truncated,
            "entries": entries,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn name_and_safety() {
        let tool = GlobTool::new();
        assert_eq!(tool.name(), "glob");
        assert!(tool.is_safe());
    }

    #[tokio::test]
    async fn lists_directory_with_pattern() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.rs"), "").await.unwrap();
        fs::write(dir.path().join("b.txt"), "").await.unwrap();
        fs::write(dir.path().join("c.rs"), "").await.unwrap();

        let tool = GlobTool::new();
        let output = tool
            .execute(serde_json::json!({"path": dir.path().display().to_string(), "pattern": "*.rs"}))
            .await
            .unwrap();

        assert!(output.success);
        assert_eq!(output.result["count"].as_u64().unwrap(), 2);
    }

    #[tokio::test]
    async fn errors_on_nonexistent_path() {
        let tool = GlobTool::new();
        let output = tool
            .execute(serde_json::json!({"path": "/nonexistent/dir"}))
            .await
            .unwrap();
        assert!(!output.success);
    }
}
