//! Work Loop: polls the Task Manager for claimable work and dispatches
//! it onto concurrently running agentic loops, bounded by a max-concurrency
//! gate and a sliding-window hourly dispatch budget.
//!
//! Grounded on `restflow-core::runtime::scheduler::poll_tick` (the
//! fire-and-track dispatch so a slow task can't stall the poller, the
//! `tokio::time::interval` timer driving ticks) generalized from a
//! fixed worker pool to a DAG-aware claim/retry-prompt/complete cycle.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;

use taskflow_contracts::task::Task;
use taskflow_traits::event::EventBus;

use crate::agentic_loop::{AgenticLoop, LoopHandle, LoopStopReason, RunConfig};
use crate::config::RuntimeConfig;
use crate::cron::{CronService, CronServiceHandle};
use crate::task_manager::TaskManager;

const WORK_LOOP_OWNER: &str = "work-loop";
const BUDGET_WINDOW_MS: i64 = 3_600_000;

/// Sliding-window dispatch budget: an ordered list of dispatch timestamps.
/// A dispatch is allowed iff fewer than `limit` timestamps fall within the
/// last hour; expired entries are dropped lazily on query, not swept.
struct Budget {
    limit: u32,
    dispatches: Mutex<VecDeque<i64>>,
}

impl Budget {
    fn new(limit: u32) -> Self {
        Self {
            limit,
            dispatches: Mutex::new(VecDeque::new()),
        }
    }

    fn prune(&self, dispatches: &mut VecDeque<i64>, now: i64) {
        while let Some(&oldest) = dispatches.front() {
            if now - oldest >= BUDGET_WINDOW_MS {
                dispatches.pop_front();
            } else {
                break;
            }
        }
    }

    fn can_dispatch(&self, now: i64) -> bool {
        let mut dispatches = self.dispatches.lock();
        self.prune(&mut dispatches, now);
        (dispatches.len() as u32) < self.limit
    }

    fn record(&self, now: i64) {
        let mut dispatches = self.dispatches.lock();
        self.prune(&mut dispatches, now);
        dispatches.push_back(now);
    }
}

/// Handle to a started work loop: stop it, or inspect what it's doing.
pub struct WorkLoopHandle {
    stop: Arc<tokio::sync::Notify>,
    stopped: Arc<std::sync::atomic::AtomicBool>,
    cron_handle: Option<CronServiceHandle>,
}

impl WorkLoopHandle {
    /// Signals the poller to stop after its current tick, stops the cron
    /// collaborator if one is running, and interrupts every running task.
    /// Returns once the stop has been requested; the loop finishes its
    /// in-flight work asynchronously.
    pub fn stop(&self) {
        self.stopped.store(true, std::sync::atomic::Ordering::SeqCst);
        self.stop.notify_waiters();
        if let Some(cron_handle) = &self.cron_handle {
            cron_handle.stop();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(std::sync::atomic::Ordering::SeqCst)
    }
}

struct RunningTask {
    handle: LoopHandle,
    started_at: i64,
}

pub struct WorkLoop {
    tasks: Arc<TaskManager>,
    agentic_loop: Arc<AgenticLoop>,
    events: Arc<dyn EventBus>,
    config: RuntimeConfig,
    max_concurrent_tasks: u32,
    polling_interval_ms: u64,
    max_iterations_per_task: u32,
    budget: Budget,
    running: Arc<AsyncMutex<std::collections::HashMap<String, RunningTask>>>,
    cron: Option<Arc<CronService>>,
}

impl WorkLoop {
    pub fn new(tasks: Arc<TaskManager>, agentic_loop: Arc<AgenticLoop>, events: Arc<dyn EventBus>, config: &RuntimeConfig) -> Self {
        Self {
            tasks,
            agentic_loop,
            events,
            config: config.clone(),
            max_concurrent_tasks: config.max_concurrent_tasks,
            polling_interval_ms: config.work_polling_interval_ms,
            max_iterations_per_task: config.work_max_iterations_per_task,
            budget: Budget::new(config.work_budget_max_tasks_per_hour),
            running: Arc::new(AsyncMutex::new(std::collections::HashMap::new())),
            cron: None,
        }
    }

    /// Attaches the optional cron collaborator (spec.md §4.8's Start/Stop
    /// paragraphs name it explicitly); `start`/`shutdown` drive its
    /// lifecycle alongside the poller's own timer.
    pub fn with_cron_service(mut self, cron: Arc<CronService>) -> Self {
        self.cron = Some(cron);
        self
    }

    fn now_ms() -> i64 {
        taskflow_storage::now_ms()
    }

    /// Starts the polling timer and fires one immediate poll. Returns a
    /// handle the caller uses to stop the loop; the returned future drives
    /// the timer and must be spawned (or polled) by the caller.
    pub fn start(self: &Arc<Self>) -> (WorkLoopHandle, tokio::task::JoinHandle<()>) {
        let stop = Arc::new(tokio::sync::Notify::new());
        let stopped = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let cron_handle = self.cron.as_ref().map(|cron| {
            let (handle, _join) = cron.start();
            handle
        });
        let handle = WorkLoopHandle {
            stop: stop.clone(),
            stopped: stopped.clone(),
            cron_handle,
        };

        let work_loop = self.clone();
        let join = tokio::spawn(async move {
            work_loop.events.emit("work:started", json!({})).await;
            work_loop.poll().await;

            let mut interval = tokio::time::interval(Duration::from_millis(work_loop.polling_interval_ms));
            interval.tick().await; // first tick fires immediately; we've already polled once above

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if stopped.load(std::sync::atomic::Ordering::SeqCst) {
                            break;
                        }
                        work_loop.poll().await;
                    }
                    _ = stop.notified() => break,
                }
            }

            work_loop.shutdown(None).await;
        });

        (handle, join)
    }

    /// One poll cycle: budget check, free-slot computation, available-task
    /// query, bounded dispatch.
    pub async fn poll(&self) {
        let now = Self::now_ms();
        if !self.budget.can_dispatch(now) {
            self.events.emit("work:budget-exhausted", json!({})).await;
            return;
        }

        let running_count = self.running.lock().await.len();
        let free = self.max_concurrent_tasks.saturating_sub(running_count as u32);
        if free == 0 {
            self.events
                .emit("work:poll", json!({"availableTasks": 0, "runningTasks": running_count}))
                .await;
            return;
        }

        let available = match self.tasks.get_available(Some(WORK_LOOP_OWNER)).await {
            Ok(tasks) => tasks,
            Err(err) => {
                warn!(error = %err, "failed to query available tasks");
                return;
            }
        };

        self.events
            .emit(
                "work:poll",
                json!({"availableTasks": available.len(), "runningTasks": running_count}),
            )
            .await;

        let mut dispatched = 0u32;
        for task in available {
            if dispatched >= free {
                break;
            }
            if !self.budget.can_dispatch(Self::now_ms()) {
                break;
            }
            self.dispatch(task).await;
            dispatched += 1;
        }
    }

    /// Claims the task for `work-loop`, builds a retry-aware prompt, and
    /// fires the agentic loop asynchronously without blocking the poller.
    async fn dispatch(&self, task: Task) {
        let claimed = match self.tasks.claim(&task.id, WORK_LOOP_OWNER).await {
            Ok(task) => task,
            Err(_) => return, // lost the race to another poller/instance
        };

        let message = match (&claimed.failure_context, claimed.retry_count) {
            (Some(context), retry_count) if retry_count > 0 => format!(
                "Previous attempt failed: {context}. This is attempt {}. Try a different approach.\n\n{}",
                retry_count + 1,
                claimed.description
            ),
            _ => claimed.description.clone(),
        };

        let handle = LoopHandle::new();
        let timeout_ms = claimed.time_budget_ms;
        self.running.lock().await.insert(
            claimed.id.clone(),
            RunningTask {
                handle: handle.clone(),
                started_at: Self::now_ms(),
            },
        );
        self.budget.record(Self::now_ms());

        self.events
            .emit("work:task-dispatched", json!({"taskId": claimed.id, "subject": claimed.subject}))
            .await;

        let run_config = RunConfig {
            max_iterations: self.max_iterations_per_task,
            timeout_ms,
            ..RunConfig::from_runtime(&self.config)
        };

        let agentic_loop = self.agentic_loop.clone();
        let tasks = self.tasks.clone();
        let events = self.events.clone();
        let running = self.running.clone();
        let task_id = claimed.id.clone();
        let started_at = Self::now_ms();

        tokio::spawn(async move {
            let result = agentic_loop.run(&handle, &message, run_config).await;
            let duration_ms = (Self::now_ms() - started_at).max(0) as u64;
            running.lock().await.remove(&task_id);

            match result {
                Ok(loop_result) if !matches!(loop_result.stop_reason, LoopStopReason::Interrupted) => {
                    if let Err(err) = tasks.update(
                        &task_id,
                        taskflow_traits::store::TaskUpdate {
                            status: Some(taskflow_contracts::task::TaskStatus::Completed),
                            ..Default::default()
                        },
                    )
                    .await
                    {
                        warn!(task_id = %task_id, error = %err, "failed to mark task completed");
                    }
                    events
                        .emit("work:task-completed", json!({"taskId": task_id, "success": true, "durationMs": duration_ms}))
                        .await;
                }
                Ok(_interrupted) => {
                    if let Err(err) = tasks.fail(&task_id, "interrupted").await {
                        warn!(task_id = %task_id, error = %err, "failed to mark interrupted task failed");
                    }
                    events
                        .emit("work:task-completed", json!({"taskId": task_id, "success": false}))
                        .await;
                }
                Err(err) => {
                    if let Err(update_err) = tasks.fail(&task_id, &err.to_string()).await {
                        warn!(task_id = %task_id, error = %update_err, "failed to record task failure");
                    }
                    events
                        .emit("work:task-completed", json!({"taskId": task_id, "success": false}))
                        .await;
                }
            }
        });
    }

    /// Clears the timer (the caller drops the join handle), interrupts
    /// every running task, resets any still-`in_progress` tasks back to
    /// `pending` on a best-effort basis, and emits `work:stopped`.
    async fn shutdown(&self, reason: Option<String>) {
        let mut running = self.running.lock().await;
        for (task_id, running_task) in running.drain() {
            running_task.handle.interrupt();
            if let Err(err) = self
                .tasks
                .update(
                    &task_id,
                    taskflow_traits::store::TaskUpdate {
                        status: Some(taskflow_contracts::task::TaskStatus::Pending),
                        clear_owner: true,
                        ..Default::default()
                    },
                )
                .await
            {
                warn!(task_id = %task_id, error = %err, "failed to reset in-progress task on shutdown");
            }
        }
        drop(running);

        self.events.emit("work:stopped", json!({"reason": reason})).await;
    }

    pub async fn running_count(&self) -> usize {
        self.running.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_allows_up_to_limit_within_window() {
        let budget = Budget::new(2);
        assert!(budget.can_dispatch(0));
        budget.record(0);
        assert!(budget.can_dispatch(0));
        budget.record(0);
        assert!(!budget.can_dispatch(0));
    }

    #[test]
    fn budget_expires_entries_outside_the_window() {
        let budget = Budget::new(1);
        budget.record(0);
        assert!(!budget.can_dispatch(BUDGET_WINDOW_MS - 1));
        assert!(budget.can_dispatch(BUDGET_WINDOW_MS + 1));
    }

    use taskflow_ai::llm::MockProvider;
    use taskflow_traits::llm::{CompletionResult, StopReason as ProviderStopReason, Usage};
    use taskflow_traits::registry::ToolRegistry;
    use taskflow_traits::store::TaskCreate;

    use crate::context::ContextStore;
    use crate::event_bus::InProcessEventBus;

    fn end_turn(text: &str) -> CompletionResult {
        CompletionResult {
            content: vec![taskflow_traits::llm::ContentBlock::Text { text: text.to_string() }],
            stop_reason: Some(ProviderStopReason::EndTurn),
            usage: Usage { input_tokens: 1, output_tokens: 1 },
        }
    }

    async fn build_work_loop(responses: Vec<CompletionResult>, config: &RuntimeConfig) -> (Arc<WorkLoop>, Arc<TaskManager>, taskflow_storage::Storage) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("work.redb");
        std::mem::forget(dir);
        let storage = taskflow_storage::Storage::open(path.to_str().unwrap()).unwrap();
        let bus: Arc<dyn EventBus> = Arc::new(InProcessEventBus::new());
        let context = Arc::new(ContextStore::new(storage.sessions.clone(), storage.messages.clone(), bus.clone()));
        let provider = Arc::new(MockProvider::new(responses));
        let agentic_loop = Arc::new(AgenticLoop::new(context, provider, Arc::new(ToolRegistry::new()), bus.clone()));
        let tasks = Arc::new(TaskManager::new(storage.tasks.clone(), bus.clone()));
        let work_loop = Arc::new(WorkLoop::new(tasks.clone(), agentic_loop, bus, config));
        (work_loop, tasks, storage)
    }

    #[tokio::test]
    async fn dispatched_task_is_removed_from_running_set_on_completion() {
        let mut config = RuntimeConfig::default();
        config.max_concurrent_tasks = 1;
        config.work_budget_max_tasks_per_hour = 10;
        let (work_loop, tasks, _storage) = build_work_loop(vec![end_turn("done")], &config).await;

        let task = tasks
            .create(TaskCreate {
                subject: "say hi".to_string(),
                description: "respond with a greeting".to_string(),
                active_form: None,
                owner: None,
                blocked_by: Vec::new(),
                metadata: serde_json::Map::new(),
                time_budget_ms: None,
                verify_command: None,
            })
            .await
            .unwrap();

        work_loop.poll().await;
        assert_eq!(work_loop.running_count().await, 1);

        for _ in 0..50 {
            if work_loop.running_count().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(work_loop.running_count().await, 0, "completed task must be dropped from the running set");
        let completed = tasks.get(&task.id).await.unwrap().unwrap();
        assert_eq!(completed.status, taskflow_contracts::task::TaskStatus::Completed);
    }

    #[tokio::test]
    async fn concurrency_ceiling_is_respected_across_polls() {
        let mut config = RuntimeConfig::default();
        config.max_concurrent_tasks = 1;
        config.work_budget_max_tasks_per_hour = 10;
        let (work_loop, tasks, _storage) = build_work_loop(
            vec![end_turn("first"), end_turn("second")],
            &config,
        )
        .await;

        for i in 0..2 {
            tasks
                .create(TaskCreate {
                    subject: format!("task {i}"),
                    description: "do the thing".to_string(),
                    active_form: None,
                    owner: None,
                    blocked_by: Vec::new(),
                    metadata: serde_json::Map::new(),
                    time_budget_ms: None,
                    verify_command: None,
                })
                .await
                .unwrap();
        }

        work_loop.poll().await;
        assert!(work_loop.running_count().await <= 1);

        for _ in 0..50 {
            if work_loop.running_count().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(work_loop.running_count().await, 0);

        // Second poll should pick up the remaining task now that a slot freed.
        work_loop.poll().await;
        assert!(work_loop.running_count().await <= 1);
    }
}
