//! Argument parsing. Grounded on `restflow-cli::cli`'s derive-based
//! `Cli`/`Commands` shape, reduced to SPEC_FULL.md §11.5's surface: `run`
//! (start the Work Loop against a config file) and `task add/list`
//! (exercise the Task Manager directly, without a running loop).

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "taskflow")]
#[command(version, about = "Taskflow - autonomous agent runtime")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// redb database path.
    #[arg(long, global = true, env = "TASKFLOW_DB_PATH", default_value = "taskflow.redb")]
    pub db_path: String,

    /// Enable verbose (debug) logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the Work Loop against a configuration file.
    Run {
        /// Path to a TOML runtime configuration file; defaults are used if omitted.
        #[arg(long)]
        config: Option<String>,
    },

    /// Task Manager operations.
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },
}

#[derive(Subcommand)]
pub enum TaskCommands {
    /// Create a new pending task.
    Add {
        subject: String,

        #[arg(long, default_value = "")]
        description: String,

        /// Task ids this task is blocked by.
        #[arg(long = "blocked-by")]
        blocked_by: Vec<String>,

        /// Shell command certifying completion.
        #[arg(long)]
        verify_command: Option<String>,
    },

    /// List all tasks.
    List,
}
