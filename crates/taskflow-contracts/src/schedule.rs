//! Schedule entry: the data record the Work Loop's optional cron
//! collaborator fires tasks against. Carries no behavior itself — next-run
//! arithmetic lives on `taskflow-core::cron::CronService`, the same split
//! this crate keeps between a `Task`'s fields and `TaskManager`'s mutation
//! logic.

use serde::{Deserialize, Serialize};

/// How a schedule entry recurs. Mirrors spec.md's `at`/`every`/`cron`
/// kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduleKind {
    /// Fire once at a specific time.
    At { run_at: i64 },
    /// Fire on a fixed millisecond interval.
    Every { interval_ms: i64 },
    /// Fire on a cron expression, optionally in a named timezone.
    Cron {
        expression: String,
        #[serde(default)]
        timezone: Option<String>,
    },
}

/// A recurring or one-shot trigger that creates a task when it fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub id: String,
    pub kind: ScheduleKind,
    pub enabled: bool,
    pub next_run_at: Option<i64>,
    pub task_subject: String,
    pub task_description: String,
}

impl ScheduleEntry {
    pub fn new(
        id: impl Into<String>,
        kind: ScheduleKind,
        task_subject: impl Into<String>,
        task_description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            enabled: true,
            next_run_at: None,
            task_subject: task_subject.into(),
            task_description: task_description.into(),
        }
    }
}
