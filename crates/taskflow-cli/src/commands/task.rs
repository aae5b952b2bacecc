//! `taskflow task add|list` — exercises the Task Manager directly without
//! a running Work Loop. Grounded on `restflow-cli::commands::task`'s
//! `comfy_table`-rendered listing.

use std::sync::Arc;

use anyhow::Result;
use comfy_table::{Cell, Table};

use taskflow_core::event_bus::InProcessEventBus;
use taskflow_core::task_manager::TaskManager;
use taskflow_storage::Storage;
use taskflow_traits::event::EventBus;
use taskflow_traits::store::TaskCreate;

use crate::cli::TaskCommands;

pub async fn run(command: TaskCommands, db_path: &str) -> Result<()> {
    let storage = Storage::open(db_path)?;
    let events: Arc<dyn EventBus> = Arc::new(InProcessEventBus::new());
    let manager = TaskManager::new(storage.tasks.clone(), events);

    match command {
        TaskCommands::Add {
            subject,
            description,
            blocked_by,
            verify_command,
        } => add(&manager, subject, description, blocked_by, verify_command).await,
        TaskCommands::List => list(&manager).await,
    }
}

async fn add(
    manager: &TaskManager,
    subject: String,
    description: String,
    blocked_by: Vec<String>,
    verify_command: Option<String>,
) -> Result<()> {
    let task = manager
        .create(TaskCreate {
            subject,
            description,
            active_form: None,
            owner: None,
            blocked_by,
            metadata: serde_json::Map::new(),
            time_budget_ms: None,
            verify_command,
        })
        .await?;
    println!("created task {} ({})", task.id, task.subject);
    Ok(())
}

async fn list(manager: &TaskManager) -> Result<()> {
    let tasks = manager.list().await?;
    let mut table = Table::new();
    table.set_header(vec!["ID", "Subject", "Status", "Owner", "Blocked By", "Retries"]);
    for task in tasks {
        table.add_row(vec![
            Cell::new(&task.id),
            Cell::new(&task.subject),
            Cell::new(format!("{:?}", task.status)),
            Cell::new(task.owner.unwrap_or_default()),
            Cell::new(task.blocked_by.len()),
            Cell::new(task.retry_count),
        ]);
    }
    println!("{table}");
    Ok(())
}
