//! Runtime configuration record: the set of recognized runtime options,
//! loaded from an optional TOML file merged over defaults.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueModeConfig {
    Steer,
    Default,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub agent_id: String,
    pub data_dir: String,
    pub model: String,
    pub max_tokens: u32,
    pub compaction_threshold: f64,
    pub effective_context_window: u64,
    pub queue_mode: QueueModeConfig,
    pub collect_window_ms: u64,
    pub hook_timeout_ms: u64,
    pub turn_timeout_ms: u64,
    pub debug: bool,
    pub mcp_debug: bool,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_enabled: bool,
    pub max_concurrent_tasks: u32,
    pub work_polling_interval_ms: u64,
    pub work_max_iterations_per_task: u32,
    pub work_budget_max_tasks_per_hour: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            agent_id: "taskflow".to_string(),
            data_dir: ".".to_string(),
            model: "default".to_string(),
            max_tokens: 8192,
            compaction_threshold: 0.8,
            effective_context_window: 180_000,
            queue_mode: QueueModeConfig::Default,
            collect_window_ms: 0,
            hook_timeout_ms: 30_000,
            turn_timeout_ms: 600_000,
            debug: false,
            mcp_debug: false,
            heartbeat_interval_ms: 30_000,
            heartbeat_enabled: false,
            max_concurrent_tasks: 3,
            work_polling_interval_ms: 5_000,
            work_max_iterations_per_task: 100,
            work_budget_max_tasks_per_hour: 60,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl RuntimeConfig {
    /// Loads a TOML file and merges it over defaults; `None`/missing file
    /// yields plain defaults. Validates before returning.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => {
                let contents =
                    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                        path: path.to_string(),
                        source,
                    })?;
                toml::from_str(&contents).map_err(|source| ConfigError::Parse {
                    path: path.to_string(),
                    source,
                })?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Enforces the boundary conditions: `maxConcurrentTasks`
    /// accepts 1..=20, `compactionThreshold` is a fraction in (0, 1].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=20).contains(&self.max_concurrent_tasks) {
            return Err(ConfigError::Invalid(format!(
                "max_concurrent_tasks must be in 1..=20, got {}",
                self.max_concurrent_tasks
            )));
        }
        if !(self.compaction_threshold > 0.0 && self.compaction_threshold <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "compaction_threshold must be in (0, 1], got {}",
                self.compaction_threshold
            )));
        }
        if self.effective_context_window == 0 {
            return Err(ConfigError::Invalid(
                "effective_context_window must be nonzero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(RuntimeConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_concurrency() {
        let mut config = RuntimeConfig::default();
        config.max_concurrent_tasks = 0;
        assert!(config.validate().is_err());
        config.max_concurrent_tasks = 21;
        assert!(config.validate().is_err());
        config.max_concurrent_tasks = 1;
        assert!(config.validate().is_ok());
        config.max_concurrent_tasks = 20;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = RuntimeConfig::load(None).unwrap();
        assert_eq!(config.max_concurrent_tasks, 3);
    }

    #[test]
    fn loads_and_merges_toml_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "agent_id = \"custom\"\nmax_concurrent_tasks = 10\n").unwrap();
        let config = RuntimeConfig::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(config.agent_id, "custom");
        assert_eq!(config.max_concurrent_tasks, 10);
        assert_eq!(config.model, "default");
    }
}
