//! Bash tool: run a shell command and capture stdout/stderr/exit status.
//! Unsafe with no identifiable target, so it always falls back to the
//! `__unknown__` serialization key.
//!
//! Grounded in `restflow-tools`'s `BashTool`, trimmed of its security-gate
//! integration (no counterpart here) but keeping its timeout handling
//! and output-truncation logic. Timeout kills the whole process group
//! with `SIGTERM`, then `SIGKILL` after a 5-second grace, the same
//! two-step shape `taskflow-core::task_verifier` uses for its own
//! subprocess.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tokio::time::{Duration, timeout};

use taskflow_traits::error::Result;
use taskflow_traits::tool::{Tool, ToolErrorCategory, ToolOutput};

const DEFAULT_TIMEOUT_SECS: u64 = 120;
const DEFAULT_MAX_OUTPUT_BYTES: usize = 100_000;
const KILL_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct BashInput {
    command: String,
    #[serde(default)]
    workdir: Option<String>,
    #[serde(default)]
    timeout: Option<u64>,
}

#[derive(Debug, Serialize)]
struct BashOutput {
    exit_code: i32,
    stdout: String,
    stderr: String,
    truncated: bool,
    duration_ms: u64,
}

pub struct BashTool {
    timeout_secs: u64,
    max_output_bytes: usize,
}

impl Default for BashTool {
    fn default() -> Self {
        Self::new()
    }
}

impl BashTool {
    pub fn new() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_max_output(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }

    fn truncate_output(&self, bytes: &[u8]) -> (String, bool) {
        let total_len = bytes.len();
        let truncated = total_len > self.max_output_bytes;
        let slice = if truncated {
            let mut end = self.max_output_bytes;
            while end > 0 && (bytes[end] & 0xC0) == 0x80 {
                end -= 1;
            }
            &bytes[..end]
        } else {
            bytes
        };
        let text = String::from_utf8_lossy(slice).to_string();
        if truncated {
            (format!("{text}...\n[Output truncated, {total_len} bytes total]"), true)
        } else {
            (text, false)
        }
    }

    fn classify_failure(stderr: &str) -> (ToolErrorCategory, bool) {
        let normalized = stderr.to_ascii_lowercase();
        if normalized.contains("command not found") || normalized.contains("no such file or directory") {
            return (ToolErrorCategory::Config, false);
        }
        if normalized.contains("permission denied") || normalized.contains("operation not permitted") {
            return (ToolErrorCategory::Auth, false);
        }
        if normalized.contains("connection refused")
            || normalized.contains("connection reset")
            || normalized.contains("timed out")
            || normalized.contains("network is unreachable")
        {
            return (ToolErrorCategory::Network, true);
        }
        (ToolErrorCategory::Execution, false)
    }

    async fn run(
        &self,
        command: &str,
        workdir: &str,
        timeout_secs: u64,
    ) -> std::result::Result<(i32, String, String, bool), std::io::Error> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(workdir)
            .kill_on_drop(true)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn()?;
        #[cfg(unix)]
        let process_group_id = child.id().map(|pid| pid as i32);

        // `wait_with_output` takes `child` by value, so once this future is
        // handed to `timeout` the child is only reachable through the pid
        // captured above; a timeout falls back to signaling that pid
        // directly rather than the (now unreachable) `Child` handle.
        let output = match timeout(Duration::from_secs(timeout_secs), child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                #[cfg(unix)]
                if let Some(process_group_id) = process_group_id {
                    let pgid = nix::unistd::Pid::from_raw(process_group_id);
                    let _ = nix::sys::signal::killpg(pgid, nix::sys::signal::Signal::SIGTERM);
                    tokio::time::sleep(KILL_GRACE).await;
                    let _ = nix::sys::signal::killpg(pgid, nix::sys::signal::Signal::SIGKILL);
                }
                return Err(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("Timeout after {timeout_secs} seconds"),
                ));
            }
        };

        let exit_code = output.status.code().unwrap_or(-1);
        let (stdout, stdout_truncated) = self.truncate_output(&output.stdout);
        let (stderr, stderr_truncated) = self.truncate_output(&output.stderr);

        Ok((exit_code, stdout, stderr, stdout_truncated || stderr_truncated))
    }
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Run a shell command and return stdout, stderr, and exit status. Prefer read/write/edit for file content operations."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {"type": "string", "description": "Shell command to execute"},
                "workdir": {"type": "string", "description": "Working directory for the command"},
                "timeout": {"type": "integer", "description": "Timeout in seconds (default: 120)"}
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, input: Value) -> Result<ToolOutput> {
        let input: BashInput = serde_json::from_value(input)?;
        let workdir = input.workdir.unwrap_or_else(|| ".".to_string());
        let timeout_secs = input.timeout.unwrap_or(self.timeout_secs);

        let start = Instant::now();
        let result = self.run(&input.command, &workdir, timeout_secs).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok((exit_code, stdout, stderr, truncated)) => {
                let failure_meta = (exit_code != 0).then(|| Self::classify_failure(&stderr));
                let output = BashOutput {
                    exit_code,
                    stdout,
                    stderr,
                    truncated,
                    duration_ms,
                };
                Ok(ToolOutput {
                    success: exit_code == 0,
                    result: serde_json::to_value(&output)?,
                    error: (exit_code != 0).then(|| format!("Command exited with code {exit_code}")),
                    error_category: failure_meta.as_ref().map(|(category, _)| category.clone()),
                    retryable: failure_meta.map(|(_, retryable)| retryable),
                    retry_after_ms: None,
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(ToolOutput::retryable_error(
                format!("Timeout after {timeout_secs} seconds"),
                ToolErrorCategory::Network,
            )),
            Err(e) => Ok(ToolOutput::non_retryable_error(
                e.to_string(),
                ToolErrorCategory::Execution,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_and_defaults() {
        let tool = BashTool::new();
        assert_eq!(tool.name(), "bash");
        assert!(!tool.is_safe());
        assert_eq!(tool.target_key(&serde_json::json!({})), "__unknown__");
    }

    #[test]
    fn truncates_at_utf8_boundary() {
        let tool = BashTool::new().with_max_output(4);
        let data = "你好世界".as_bytes();
        let (text, truncated) = tool.truncate_output(data);
        assert!(truncated);
        assert!(text.starts_with('你'));
        assert!(!text.contains('\u{FFFD}'));
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn runs_simple_command() {
        let tool = BashTool::new();
        let output = tool.execute(serde_json::json!({"command": "echo hi"})).await.unwrap();
        assert!(output.success);
        assert_eq!(output.result["exit_code"], 0);
        assert!(output.result["stdout"].as_str().unwrap().contains("hi"));
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn nonzero_exit_reports_error() {
        let tool = BashTool::new();
        let output = tool.execute(serde_json::json!({"command": "exit 3"})).await.unwrap();
        assert!(!output.success);
        assert_eq!(output.result["exit_code"], 3);
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn timeout_is_retryable() {
        let tool = BashTool::new().with_timeout(1);
        let output = tool.execute(serde_json::json!({"command": "sleep 5"})).await.unwrap();
        assert!(!output.success);
        assert_eq!(output.retryable, Some(true));
    }
}
