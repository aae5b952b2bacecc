//! Read tool: view file contents with line numbers and pagination.
//!
//! Grounded in `restflow-tools`'s `FileTool`'s `read` action, trimmed to a
//! single operation under this crate's one-tool-per-name shape.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::fs;

use taskflow_traits::error::Result;
use taskflow_traits::tool::{Tool, ToolOutput};

const DEFAULT_MAX_READ_BYTES: u64 = 1_000_000;
const DEFAULT_LINE_LIMIT: usize = 2000;

#[derive(Debug, Deserialize)]
struct ReadInput {
    path: String,
    #[serde(default)]
    offset: usize,
    #[serde(default)]
    limit: Option<usize>,
}

pub struct ReadTool {
    max_read_bytes: u64,
}

impl Default for ReadTool {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadTool {
    pub fn new() -> Self {
        Self {
            max_read_bytes: DEFAULT_MAX_READ_BYTES,
        }
    }

    pub fn with_max_read(mut self, bytes: u64) -> Self {
        self.max_read_bytes = bytes;
        self
    }
}

#[async_trait]
impl Tool for ReadTool {
    fn name(&self) -> &str {
        "read"
    }

    fn description(&self) -> &str {
        "Read a file's contents with line numbers. Supports offset/limit for partial reads of large files."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "File path to read"},
                "offset": {"type": "integer", "description": "Start reading from this line number (0-indexed)"},
                "limit": {"type": "integer", "description": "Maximum lines to read"}
            },
            "required": ["path"]
        })
    }

    fn is_safe(&self) -> bool {
        true
    }

    async fn execute(&self, input: Value) -> Result<ToolOutput> {
        let input: ReadInput = serde_json::from_value(input)?;
        let path = std::path::Path::new(&input.path);

        if !path.exists() {
            return Ok(ToolOutput::error(format!(
                "File not found: {}",
                path.display()
            )));
        }
        if !path.is_file() {
            return Ok(ToolOutput::error(format!("Not a file: {}", path.display())));
        }

        let metadata = match fs::metadata(path).await {
            Ok(m) => m,
            Err(e) => return Ok(ToolOutput::error(format!("Cannot read metadata: {e}"))),
        };
        if metadata.len() > self.max_read_bytes {
            return Ok(ToolOutput::error(format!(
                "File too large ({} bytes). Maximum: {} bytes. Use offset/limit for partial reads.",
                metadata.len(),
                self.max_read_bytes
            )));
        }

        let content = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) => return Ok(ToolOutput::error(format!("Cannot read file: {e}"))),
        };

        let lines: Vec<&str> = content.lines().collect();
        let total_lines = lines.len();
        let line_limit = input.limit.unwrap_or(DEFAULT_LINE_LIMIT);
        let start = input.offset.min(total_lines);
        let end = (start + line_limit).min(total_lines);

        let selected: Vec<String> = lines[start..end]
            .iter()
            .enumerate()
            .map(|(i, line)| format!("{:4} | {}", start + i + 1, line))
            .collect();

        Ok(ToolOutput::success(serde_json::json!({
            "path": path.display().to_string(),
            "total_lines": total_lines,
            "showing": format!("{}-{}", start + 1, end),
            "content": selected.join("\n"),
        })))
    }
}
