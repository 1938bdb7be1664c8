//! YAML task-file parsing.
//!
//! Unknown dependencies and cycles are not checked here. They are reported
//! by [`TaskGraph::build`](crate::core::dag::TaskGraph::build) when the
//! tasks are run.

use std::collections::HashSet;
use std::path::Path;

use super::error::ConfigError;
use super::types::TaskFileConfig;

/// YAML configuration loader.
pub struct YamlLoader;

impl YamlLoader {
    /// Load a task file from disk.
    pub fn load_file(path: impl AsRef<Path>) -> Result<TaskFileConfig, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_str(&content)
    }

    /// Parse a task file from a YAML string.
    pub fn parse_str(yaml: &str) -> Result<TaskFileConfig, ConfigError> {
        let config: TaskFileConfig = serde_yaml::from_str(yaml)?;
        Self::validate(&config)?;
        Ok(config)
    }

    fn validate(config: &TaskFileConfig) -> Result<(), ConfigError> {
        if config.tasks.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "task file must have at least one task".into(),
            ));
        }

        if config.concurrency == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "concurrency cannot be zero".into(),
            ));
        }

        let mut task_ids = HashSet::new();
        for task in &config.tasks {
            if task.id.is_empty() {
                return Err(ConfigError::MissingField("id".into()));
            }
            if task.command.is_empty() {
                return Err(ConfigError::MissingField(format!("{}.command", task.id)));
            }
            if !task_ids.insert(task.id.as_str()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "duplicate task id: {}",
                    task.id
                )));
            }

            let mut seen_deps = HashSet::new();
            for dep in &task.depends_on {
                if dep == &task.id {
                    return Err(ConfigError::InvalidConfig(format!(
                        "task '{}' cannot depend on itself",
                        task.id
                    )));
                }
                if !seen_deps.insert(dep) {
                    return Err(ConfigError::InvalidConfig(format!(
                        "task '{}' has duplicate dependency '{}'",
                        task.id, dep
                    )));
                }
            }
        }

        Ok(())
    }
}
