//! Configuration type definitions.
//!
//! Structures mirroring the YAML task-file format.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// A task file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskFileConfig {
    /// Maximum tasks running at once.
    pub concurrency: Option<usize>,
    /// Snapshot publishing interval in milliseconds.
    pub publish_interval_ms: Option<u64>,
    /// Task definitions.
    pub tasks: Vec<TaskConfig>,
}

impl TaskFileConfig {
    /// Publishing interval as a `Duration`, if configured.
    pub fn publish_interval(&self) -> Option<Duration> {
        self.publish_interval_ms.map(Duration::from_millis)
    }
}

/// A single command task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Task identifier (unique within the file).
    pub id: String,
    /// Human-readable name. Defaults to the id.
    pub name: Option<String>,
    /// Program to run.
    pub command: String,
    /// Command arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory.
    pub working_dir: Option<PathBuf>,
    /// Environment variables for this task.
    #[serde(default)]
    pub environment: HashMap<String, String>,
    /// Tasks that must succeed first.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Retry policy for this task.
    pub retry: Option<RetryConfig>,
    /// Where to write the task's output once it finishes.
    pub log_file: Option<PathBuf>,
}

/// Retry policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds. Doubles each retry.
    #[serde(default)]
    pub backoff_ms: u64,
}

impl RetryConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}
