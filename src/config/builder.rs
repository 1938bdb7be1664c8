//! Task builder from YAML configuration.
//!
//! Converts a [`TaskFileConfig`] into command-backed task definitions and
//! the run options it asks for.

use std::path::Path;

use crate::core::environment::Environment;
use crate::core::retry::RetryPolicy;
use crate::core::task::TaskDefinition;
use crate::execution::CommandSpec;
use crate::runner::RunOptions;

use super::error::ConfigError;
use super::types::{RetryConfig, TaskConfig, TaskFileConfig};
use super::yaml::YamlLoader;

/// Builder for creating task definitions from YAML configuration.
pub struct TaskSetBuilder;

impl TaskSetBuilder {
    /// Build task definitions in file order.
    pub fn build(config: &TaskFileConfig) -> Vec<TaskDefinition> {
        config.tasks.iter().map(Self::build_task).collect()
    }

    /// Run options carrying the file's concurrency and publish interval.
    pub fn run_options(config: &TaskFileConfig) -> RunOptions {
        let mut options = RunOptions::new();
        if let Some(concurrency) = config.concurrency {
            options = options.concurrency(concurrency);
        }
        if let Some(interval) = config.publish_interval() {
            options = options.publish_interval(interval);
        }
        options
    }

    /// Load a task file and build its tasks.
    pub fn load(path: impl AsRef<Path>) -> Result<(TaskFileConfig, Vec<TaskDefinition>), ConfigError> {
        let config = YamlLoader::load_file(path)?;
        let tasks = Self::build(&config);
        Ok((config, tasks))
    }

    fn build_task(config: &TaskConfig) -> TaskDefinition {
        let environment: Environment = config
            .environment
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let mut spec = CommandSpec::builder(&config.command)
            .args(&config.args)
            .environment(environment);
        if let Some(dir) = &config.working_dir {
            spec = spec.working_dir(dir);
        }

        let mut task = TaskDefinition::command(config.id.as_str(), spec.build())
            .with_dependencies(config.depends_on.iter().map(String::as_str));
        if let Some(name) = &config.name {
            task = task.with_name(name);
        }
        if let Some(retry) = &config.retry {
            task = task.with_retry(Self::build_retry_policy(retry));
        }
        if let Some(path) = &config.log_file {
            task = task.with_log_file(path);
        }
        task
    }

    fn build_retry_policy(config: &RetryConfig) -> RetryPolicy {
        RetryPolicy::exponential(config.max_retries, config.backoff())
    }
}
