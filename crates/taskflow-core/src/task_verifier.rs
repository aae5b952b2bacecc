//! Task Verifier: subscribes to `task:completed` and, when the task
//! carries a `verifyCommand`, runs it as a scoped shell subprocess and
//! retries or finalizes the task based on its exit code.
//!
//! Grounded on `restflow-ai::tools::bash::BashTool::run_command` for the
//! subprocess shape: `sh -c <command>` in its own process group so a
//! timeout can be enforced with `SIGTERM` then `SIGKILL` across the whole
//! tree, and UTF-8-boundary-safe output truncation.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::warn;

use taskflow_traits::event::EventBus;

use crate::task_manager::TaskManager;

/// Combined stdout+stderr is trimmed and capped to this many characters
/// before being stored or emitted.
const MAX_OUTPUT_CHARS: usize = 2000;
const VERIFY_TIMEOUT_SECS: u64 = 30;
const KILL_GRACE: Duration = Duration::from_millis(500);
const TIMEOUT_EXIT_CODE: i32 = 124;

/// Default bound on `retry(id)` calls the verifier will issue for a single
/// task before leaving it `failed`.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// The task has no `verifyCommand`; nothing to do.
    Skipped,
    Passed,
    Failed { exit_code: i32, output: String, retried: bool },
}

pub struct TaskVerifier {
    tasks: Arc<TaskManager>,
    events: Arc<dyn EventBus>,
    max_retries: u32,
}

impl TaskVerifier {
    pub fn new(tasks: Arc<TaskManager>, events: Arc<dyn EventBus>) -> Self {
        Self {
            tasks,
            events,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Subscribes to `task:completed` on the given bus. Returns the
    /// subscription so the caller can unsubscribe on shutdown.
    pub fn subscribe(self: &Arc<Self>) -> taskflow_traits::event::Subscription {
        let verifier = self.clone();
        self.events.on(
            "task:completed",
            Box::new(move |payload| {
                let verifier = verifier.clone();
                Box::pin(async move {
                    let Some(task) = payload.get("task") else { return };
                    let Some(id) = task.get("id").and_then(|v| v.as_str()) else { return };
                    let verify_command = task.get("verify_command").and_then(|v| v.as_str()).map(str::to_string);
                    if let Some(command) = verify_command {
                        let retry_count = task.get("retry_count").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
                        verifier.verify(id, &command, retry_count).await;
                    }
                })
            }),
        )
    }

    /// Runs `verifyCommand` for `task_id`, updates the task, and emits the
    /// pass/fail event. Exposed directly (not only via the event
    /// subscription) so callers can trigger verification without routing
    /// through the bus.
    pub async fn verify(&self, task_id: &str, verify_command: &str, retry_count: u32) -> VerifyOutcome {
        let (exit_code, output) = self.run_verify_command(verify_command).await;

        if exit_code == 0 {
            let mut metadata = serde_json::Map::new();
            metadata.insert("verifyPassed".to_string(), serde_json::Value::Bool(true));
            if let Err(err) = self
                .tasks
                .update(
                    task_id,
                    taskflow_traits::store::TaskUpdate {
                        metadata: Some(metadata),
                        ..Default::default()
                    },
                )
                .await
            {
                warn!(task_id = %task_id, error = %err, "failed to record verification pass");
            }
            self.events
                .emit("task:verification_passed", json!({"taskId": task_id}))
                .await;
            return VerifyOutcome::Passed;
        }

        let message = format!("Verification failed (exit {exit_code}): {output}");
        if let Err(err) = self.tasks.fail(task_id, &message).await {
            warn!(task_id = %task_id, error = %err, "failed to record verification failure");
        }

        let attempt = retry_count + 1;
        self.events
            .emit(
                "task:verification_failed",
                json!({"taskId": task_id, "attempt": attempt, "output": output}),
            )
            .await;

        let retried = if retry_count < self.max_retries {
            if let Err(err) = self.tasks.retry(task_id).await {
                warn!(task_id = %task_id, error = %err, "failed to requeue task after verification failure");
                false
            } else {
                true
            }
        } else {
            false
        };

        VerifyOutcome::Failed {
            exit_code,
            output,
            retried,
        }
    }

    async fn run_verify_command(&self, command: &str) -> (i32, String) {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .kill_on_drop(true)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        #[cfg(unix)]
        cmd.process_group(0);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => return (-1, format!("failed to spawn verify command: {err}")),
        };

        #[cfg(unix)]
        let process_group_id = child.id().map(|pid| pid as i32);

        match timeout(Duration::from_secs(VERIFY_TIMEOUT_SECS), child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let exit_code = output.status.code().unwrap_or(-1);
                let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
                combined.push_str(&String::from_utf8_lossy(&output.stderr));
                (exit_code, truncate_output(combined.trim()))
            }
            Ok(Err(err)) => (-1, format!("failed to collect verify command output: {err}")),
            Err(_elapsed) => {
                #[cfg(unix)]
                if let Some(process_group_id) = process_group_id {
                    let pgid = nix::unistd::Pid::from_raw(process_group_id);
                    let _ = nix::sys::signal::killpg(pgid, nix::sys::signal::Signal::SIGTERM);
                    tokio::time::sleep(KILL_GRACE).await;
                    let _ = nix::sys::signal::killpg(pgid, nix::sys::signal::Signal::SIGKILL);
                }
                (TIMEOUT_EXIT_CODE, format!("verification timed out after {VERIFY_TIMEOUT_SECS}s"))
            }
        }
    }
}

/// Caps `text` at `MAX_OUTPUT_CHARS`, walking backward from the cut point
/// to a valid UTF-8 boundary.
fn truncate_output(text: &str) -> String {
    if text.len() <= MAX_OUTPUT_CHARS {
        return text.to_string();
    }
    let mut end = MAX_OUTPUT_CHARS;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}
