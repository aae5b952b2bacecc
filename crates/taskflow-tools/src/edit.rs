//! Edit tool: exact string replacement within an existing file. Unsafe and
//! target-keyed by `file_path`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::fs;

use taskflow_traits::error::Result;
use taskflow_traits::tool::{Tool, ToolOutput};

#[derive(Debug, Deserialize)]
struct EditInput {
    file_path: String,
    old_string: String,
    new_string: String,
    #[serde(default)]
    replace_all: bool,
}

#[derive(Default)]
pub struct EditTool;

impl EditTool {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tool for EditTool {
    fn name(&self) -> &str {
        "edit"
    }

    fn description(&self) -> &str {
        "Replace an exact string match within a file. Fails if the match is not unique unless replace_all is set."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "file_path": {"type": "string", "description": "File to edit"},
                "old_string": {"type": "string", "description": "Exact text to replace"},
                "new_string": {"type": "string", "description": "Replacement text"},
                "replace_all": {"type": "boolean", "description": "Replace every occurrence instead of requiring a unique match"}
            },
            "required": ["file_path", "old_string", "new_string"]
        })
    }

    fn target_key(&self, input: &Value) -> String {
        input
            .get("file_path")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| "__unknown__".to_string())
    }

    async fn execute(&self, input: Value) -> Result<ToolOutput> {
        let input: EditInput = serde_json::from_value(input)?;
        let path = std::path::Path::new(&input.file_path);

        if !path.is_file() {
            return Ok(ToolOutput::error(format!(
                "File not found: {}",
                path.display()
            )));
        }

        let content = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) => return Ok(ToolOutput::error(format!("Cannot read file: {e}"))),
        };

        let occurrences = content.matches(input.old_string.as_str()).count();
        if occurrences == 0 {
            return Ok(ToolOutput::error("old_string not found in file"));
        }
        if occurrences > 1 && !input.replace_all {
            return Ok(ToolOutput::error(format!(
                "old_string matches {occurrences} locations; pass replace_all to edit all, or narrow old_string to a unique match"
            )));
        }

        let updated = if input.replace_all {
            content.replace(&input.old_string, &input.new_string)
        } else {
            content.replacen(&input.old_string, &input.new_string, 1)
        };

        match fs::write(path, &updated).await {
            Ok(()) => Ok(ToolOutput::success(serde_json::json!({
                "path": path.display().to_string(),
                "replacements": if input.replace_all { occurrences } else { 1 },
            }))),
            Err(e) => Ok(ToolOutput::error(format!("Cannot write file: {e}"))),
        }
    }
}
