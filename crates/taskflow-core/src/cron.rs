//! Cron Service: the Work Loop's optional collaborator that turns
//! `ScheduleEntry` triggers into freshly created tasks.
//!
//! Grounded on `restflow-core::models::agent_task::AgentTask`'s
//! `calculate_next_run`/`next_cron_time` (the `Once`/`Interval`/`Cron`
//! next-run arithmetic, including the `cron`/`chrono_tz`-powered cron
//! branch), with `work_loop.rs`'s own `Notify`-driven start/stop timer
//! shape reused for the service's own tick loop.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::json;
use tracing::warn;

use taskflow_contracts::schedule::{ScheduleEntry, ScheduleKind};
use taskflow_traits::event::EventBus;
use taskflow_traits::store::TaskCreate;

use crate::task_manager::TaskManager;

/// Handle to a started cron service: stop its tick loop.
pub struct CronServiceHandle {
    stop: Arc<tokio::sync::Notify>,
}

impl CronServiceHandle {
    pub fn stop(&self) {
        self.stop.notify_waiters();
    }
}

pub struct CronService {
    tasks: Arc<TaskManager>,
    events: Arc<dyn EventBus>,
    entries: Mutex<Vec<ScheduleEntry>>,
    polling_interval_ms: u64,
}

impl CronService {
    /// Entries missing a `next_run_at` get one computed from the current
    /// time at construction.
    pub fn new(
        tasks: Arc<TaskManager>,
        events: Arc<dyn EventBus>,
        entries: Vec<ScheduleEntry>,
        polling_interval_ms: u64,
    ) -> Self {
        let now = Self::now_ms();
        let entries = entries
            .into_iter()
            .map(|mut entry| {
                if entry.next_run_at.is_none() {
                    entry.next_run_at = Self::calculate_next_run(&entry.kind, now);
                }
                entry
            })
            .collect();
        Self {
            tasks,
            events,
            entries: Mutex::new(entries),
            polling_interval_ms,
        }
    }

    fn now_ms() -> i64 {
        taskflow_storage::now_ms()
    }

    /// Starts the tick timer. Returns a handle the caller uses to stop it;
    /// the returned join handle need not be awaited — the tick loop is
    /// fully detached once spawned, matching `WorkLoop::start`'s shape.
    pub fn start(self: &Arc<Self>) -> (CronServiceHandle, tokio::task::JoinHandle<()>) {
        let stop = Arc::new(tokio::sync::Notify::new());
        let handle = CronServiceHandle { stop: stop.clone() };

        let service = self.clone();
        let join = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(service.polling_interval_ms));
            loop {
                tokio::select! {
                    _ = interval.tick() => service.tick().await,
                    _ = stop.notified() => break,
                }
            }
        });

        (handle, join)
    }

    /// One firing pass: creates a task for every due, enabled entry, then
    /// reschedules it (or disables a one-shot `At` entry with no next run).
    pub async fn tick(&self) {
        let now = Self::now_ms();
        let due: Vec<ScheduleEntry> = {
            let entries = self.entries.lock();
            entries
                .iter()
                .filter(|entry| entry.enabled && entry.next_run_at.is_some_and(|t| t <= now))
                .cloned()
                .collect()
        };

        for entry in due {
            if let Err(err) = self
                .tasks
                .create(TaskCreate {
                    subject: entry.task_subject.clone(),
                    description: entry.task_description.clone(),
                    active_form: None,
                    owner: None,
                    blocked_by: Vec::new(),
                    metadata: serde_json::Map::new(),
                    time_budget_ms: None,
                    verify_command: None,
                })
                .await
            {
                warn!(schedule_id = %entry.id, error = %err, "cron service failed to create scheduled task");
            }
            self.events
                .emit("cron:fired", json!({"scheduleId": entry.id}))
                .await;

            let next = Self::calculate_next_run(&entry.kind, now);
            let mut entries = self.entries.lock();
            if let Some(stored) = entries.iter_mut().find(|e| e.id == entry.id) {
                stored.next_run_at = next;
                if next.is_none() && matches!(stored.kind, ScheduleKind::At { .. }) {
                    stored.enabled = false;
                }
            }
        }
    }

    pub fn entries(&self) -> Vec<ScheduleEntry> {
        self.entries.lock().clone()
    }

    /// Next fire time for `kind` strictly after `from_time`.
    pub fn calculate_next_run(kind: &ScheduleKind, from_time: i64) -> Option<i64> {
        match kind {
            ScheduleKind::At { run_at } => (*run_at > from_time).then_some(*run_at),
            ScheduleKind::Every { interval_ms } => Some(from_time + (*interval_ms).max(1)),
            ScheduleKind::Cron { expression, timezone } => {
                Self::next_cron_time(expression, timezone.as_deref(), from_time)
            }
        }
    }

    fn next_cron_time(expression: &str, timezone: Option<&str>, from_time: i64) -> Option<i64> {
        use cron::Schedule;

        let schedule = Schedule::from_str(expression).ok()?;
        let from_datetime = DateTime::from_timestamp_millis(from_time)?;

        if let Some(tz_str) = timezone
            && let Ok(tz) = tz_str.parse::<chrono_tz::Tz>()
        {
            let local_time = from_datetime.with_timezone(&tz);
            let next = schedule.after(&local_time).next()?;
            return Some(next.with_timezone(&Utc).timestamp_millis());
        }

        let next = schedule.after(&from_datetime).next()?;
        Some(next.timestamp_millis())
    }
}
