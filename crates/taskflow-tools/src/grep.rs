//! Grep tool: recursive regex search over files under a path. Concurrency
//! safe (read-only).
//!
//! Grounded in `restflow-tools`'s `FileTool::search_files`/`search_recursive`.

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use tokio::fs;

use taskflow_traits::error::Result;
use taskflow_traits::tool::{Tool, ToolOutput};

const MAX_MATCHES: usize = 100;

#[derive(Debug, Deserialize)]
struct GrepInput {
    path: String,
    pattern: String,
    #[serde(default)]
    file_pattern: Option<String>,
}

#[derive(Default)]
pub struct GrepTool;

impl GrepTool {
    pub fn new() -> Self {
        Self
    }

    fn search_recursive<'a>(
        &'a self,
        dir: &'a Path,
        regex: &'a Regex,
        file_pattern: Option<&'a str>,
        matches: &'a mut Vec<Value>,
        base: &'a Path,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            if matches.len() >= MAX_MATCHES {
                return;
            }

            if dir.is_file() {
                let name = dir.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
                if let Some(p) = file_pattern
                    && !glob_match::glob_match(p, &name)
                {
                    return;
                }
                self.search_in_file(dir, regex, matches, base).await;
                return;
            }

            let mut read_dir = match fs::read_dir(dir).await {
                Ok(rd) => rd,
                Err(_) => return,
            };

            while let Ok(Some(entry)) = read_dir.next_entry().await {
                if matches.len() >= MAX_MATCHES {
                    break;
                }
                let entry_path = entry.path();
                let file_type = match entry.file_type().await {
                    Ok(ft) => ft,
                    Err(_) => continue,
                };

                if file_type.is_dir() {
                    let name = entry.file_name().to_string_lossy().to_string();
                    if name.starts_with('.') {
                        continue;
                    }
                    self.search_recursive(&entry_path, regex, file_pattern, matches, base).await;
                } else if file_type.is_file() {
                    let name = entry.file_name().to_string_lossy().to_string();
                    if let Some(p) = file_pattern
                        && !glob_match::glob_match(p, &name)
                    {
                        continue;
                    }
                    self.search_in_file(&entry_path, regex, matches, base).await;
                }
            }
        })
    }

    async fn search_in_file(&self, file: &Path, regex: &Regex, matches: &mut Vec<Value>, base: &Path) {
        let content = match fs::read_to_string(file).await {
            Ok(c) => c,
            Err(_) => return,
        };
        let relative = file.strip_prefix(base).unwrap_or(file).to_string_lossy().to_string();

        for (line_num, line) in content.lines().enumerate() {
            if matches.len() >= MAX_MATCHES {
                break;
            }
            if regex.is_match(line) {
                matches.push(serde_json::json!({
                    "file": relative,
                    "line": line_num + 1,
                    "content": line.chars().take(200).collect::<String>(),
                }));
            }
        }
    }
}

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Search for a regex pattern in files under a path, optionally filtered by a glob file_pattern."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "File or directory to search"},
                "pattern": {"type": "string", "description": "Regex pattern to search for"},
                "file_pattern": {"type": "string", "description": "Glob pattern to filter searched filenames"}
            },
            "required": ["path", "pattern"]
        })
    }

    fn is_safe(&self) -> bool {
        true
    }

    async fn execute(&self, input: Value) -> Result<ToolOutput> {
        let input: GrepInput = serde_json::from_value(input)?;
        let path = std::path::Path::new(&input.path);

        let regex = match Regex::new(&input.pattern) {
            Ok(r) => r,
            Err(e) => return Ok(ToolOutput::error(format!("Invalid regex pattern: {e}"))),
        };

        if !path.exists() {
            return Ok(ToolOutput::error(format!("Path not found: {}", path.display())));
        }

        let mut matches = Vec::new();
        self.search_recursive(path, &regex, input.file_pattern.as_deref(), &mut matches, path)
            .await;

        Ok(ToolOutput::success(serde_json::json!({
            "pattern": input.pattern,
            "search_path": path.display().to_string(),
            "match_count": matches.len(),
            "truncated": matches.len() >= MAX_MATCHES,
            "matches": matches,
        })))
    }
}
