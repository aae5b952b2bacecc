//! Write tool: create or overwrite a file, creating parent directories as
//! needed. Unsafe and target-keyed by `path`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use taskflow_traits::error::Result;
use taskflow_traits::tool::{Tool, ToolOutput};

#[derive(Debug, Deserialize)]
struct WriteInput {
    path: String,
    content: String,
    #[serde(default)]
    append: bool,
}

#[derive(Default)]
pub struct WriteTool;

impl WriteTool {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tool for WriteTool {
    fn name(&self) -> &str {
        "write"
    }

    fn description(&self) -> &str {
        "Write or append content to a file, creating parent directories as needed."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "File path to write"},
                "content": {"type": "string", "description": "Content to write"},
                "append": {"type": "boolean", "description": "Append instead of overwrite"}
            },
            "required": ["path", "content"]
        })
    }

    fn target_key(&self, input: &Value) -> String {
        input
            .get("path")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| "__unknown__".to_string())
    }

    async fn execute(&self, input: Value) -> Result<ToolOutput> {
        let input: WriteInput = serde_json::from_value(input)?;
        let path = std::path::Path::new(&input.path);

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
            && let Err(e) = fs::create_dir_all(parent).await
        {
            return Ok(ToolOutput::error(format!("Cannot create directory: {e}")));
        }

        let result = if input.append {
            match fs::OpenOptions::new().create(true).append(true).open(path).await {
                Ok(mut file) => file.write_all(input.content.as_bytes()).await,
                Err(e) => return Ok(ToolOutput::error(format!("Cannot open file: {e}"))),
            }
        } else {
            fs::write(path, &input.content).await
        };

        match result {
            Ok(()) => Ok(ToolOutput::success(serde_json::json!({
                "path": path.display().to_string(),
                "bytes_written": input.content.len(),
                "action": if input.append { "appended" } else { "written" },
            }))),
            Err(e) => Ok(ToolOutput::error(format!("Cannot write file: {e}"))),
        }
    }
}
