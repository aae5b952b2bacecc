//! Logging bootstrap — the only place in the workspace that installs a
//! `tracing` subscriber (SPEC_FULL.md §11.1). Grounded on
//! `restflow-cli::main::init_logging`: a daily rolling file appender under
//! `<data_dir>/logs`, falling back to stderr if the directory can't be
//! created or written to.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;

pub fn init_logging(data_dir: &str, verbose: bool) -> Option<WorkerGuard> {
    let level = if verbose { "debug" } else { "info" };
    let log_dir = Path::new(data_dir).join("logs");

    if std::fs::create_dir_all(&log_dir).is_ok() {
        let probe_path = log_dir.join(".write-probe");
        let probe_ok = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&probe_path)
            .is_ok();
        if probe_ok {
            let _ = std::fs::remove_file(&probe_path);
            let file_appender = tracing_appender::rolling::daily(&log_dir, "taskflow.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::fmt()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false)
                .with_level(true)
                .with_env_filter(level)
                .init();
            return Some(guard);
        }
    }

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .with_level(true)
        .with_env_filter(level)
        .init();
    None
}
