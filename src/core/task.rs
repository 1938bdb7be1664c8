//! Task definitions and error types.
//!
//! A [`TaskDefinition`] is the immutable description of one unit of work:
//! its identity, the tasks it depends on, the work itself and an optional
//! retry policy. The work is either an external command or an arbitrary
//! async computation, see [`TaskWork`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use super::retry::RetryPolicy;
use super::types::TaskId;
use crate::events::TaskLogger;
use crate::execution::CommandSpec;

/// Diagnostic details of a command that exited unsuccessfully.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandFailure {
    /// Program that was executed.
    pub command: String,
    /// Arguments passed to the program.
    pub args: Vec<String>,
    /// Working directory, if one was set.
    pub working_dir: Option<PathBuf>,
    /// Exit code reported by the process (-1 when killed by a signal).
    pub exit_code: i32,
}

impl fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "command `{}", self.command)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        write!(f, "` exited with code {}", self.exit_code)
    }
}

/// Errors that can occur while running a task.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Computation failed with a message.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// External command exited with a nonzero code.
    #[error("{0}")]
    CommandFailed(CommandFailure),

    /// The command could not be started.
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// I/O error while talking to a running process.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The run was interrupted while this task was in flight.
    #[error("interrupted")]
    Interrupted,
}

impl TaskError {
    /// Convenience constructor for computation failures.
    pub fn failed(message: impl Into<String>) -> Self {
        TaskError::ExecutionFailed(message.into())
    }

    /// Command diagnostics, when the failure came from a command exit code.
    pub fn command_failure(&self) -> Option<&CommandFailure> {
        match self {
            TaskError::CommandFailed(failure) => Some(failure),
            _ => None,
        }
    }

    /// Whether the failure came from a nonzero command exit.
    pub fn is_command_failure(&self) -> bool {
        matches!(self, TaskError::CommandFailed(_))
    }

    /// Whether this failure was caused by an interrupt rather than the work itself.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, TaskError::Interrupted)
    }
}

/// An arbitrary async computation that can be scheduled as a task.
///
/// Progress can be surfaced through the [`TaskLogger`], whose lines show up
/// as `Stdout`/`Stderr` events exactly like command output.
#[async_trait]
pub trait Computation: Send + Sync {
    /// Run the computation to completion.
    async fn run(&self, log: TaskLogger) -> Result<Value, TaskError>;
}

/// Adapter turning an async closure into a [`Computation`].
pub struct FnComputation<F> {
    func: F,
}

impl<F> FnComputation<F> {
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F, Fut> Computation for FnComputation<F>
where
    F: Fn(TaskLogger) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, TaskError>> + Send,
{
    async fn run(&self, log: TaskLogger) -> Result<Value, TaskError> {
        (self.func)(log).await
    }
}

/// The work a task performs. Exactly one variant is set per task.
#[derive(Clone)]
pub enum TaskWork {
    /// Spawn an external process; its exit code decides the outcome.
    Command(CommandSpec),
    /// Run an in-process computation producing a result value.
    Compute(Arc<dyn Computation>),
}

impl fmt::Debug for TaskWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskWork::Command(spec) => f.debug_tuple("Command").field(spec).finish(),
            TaskWork::Compute(_) => f.write_str("Compute(..)"),
        }
    }
}

/// Immutable description of one schedulable unit of work.
#[derive(Debug, Clone)]
pub struct TaskDefinition {
    id: TaskId,
    name: String,
    dependencies: Vec<TaskId>,
    work: TaskWork,
    retry_policy: Option<RetryPolicy>,
    log_file: Option<PathBuf>,
}

impl TaskDefinition {
    /// Create a task from an id and its work. The name defaults to the id.
    pub fn new(id: impl Into<TaskId>, work: TaskWork) -> Self {
        let id = id.into();
        Self {
            name: id.as_str().to_string(),
            id,
            dependencies: Vec::new(),
            work,
            retry_policy: None,
            log_file: None,
        }
    }

    /// Create a command-backed task.
    pub fn command(id: impl Into<TaskId>, spec: CommandSpec) -> Self {
        Self::new(id, TaskWork::Command(spec))
    }

    /// Create a computation-backed task.
    pub fn compute(id: impl Into<TaskId>, computation: Arc<dyn Computation>) -> Self {
        Self::new(id, TaskWork::Compute(computation))
    }

    /// Create a computation-backed task from an async closure.
    ///
    /// ```
    /// use dagrun::TaskDefinition;
    ///
    /// let task = TaskDefinition::compute_fn("answer", |log| async move {
    ///     log.info("thinking");
    ///     Ok(serde_json::json!(42))
    /// });
    /// assert_eq!(task.id().as_str(), "answer");
    /// ```
    pub fn compute_fn<F, Fut>(id: impl Into<TaskId>, func: F) -> Self
    where
        F: Fn(TaskLogger) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, TaskError>> + Send + 'static,
    {
        Self::compute(id, Arc::new(FnComputation::new(func)))
    }

    /// Builder: set the human-readable name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Builder: add one dependency. Duplicates are ignored.
    pub fn depends_on(mut self, dependency: impl Into<TaskId>) -> Self {
        let dependency = dependency.into();
        if !self.dependencies.contains(&dependency) {
            self.dependencies.push(dependency);
        }
        self
    }

    /// Builder: add several dependencies.
    pub fn with_dependencies<I, T>(self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TaskId>,
    {
        dependencies
            .into_iter()
            .fold(self, |task, dep| task.depends_on(dep))
    }

    /// Builder: set the retry policy.
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Builder: persist a report of the task's output to `path` when it ends.
    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dependencies(&self) -> &[TaskId] {
        &self.dependencies
    }

    pub fn work(&self) -> &TaskWork {
        &self.work
    }

    /// Retry policy; absent means the task is attempted exactly once.
    pub fn retry_policy(&self) -> Option<&RetryPolicy> {
        self.retry_policy.as_ref()
    }

    /// Retry policy, defaulting to [`RetryPolicy::none`].
    pub fn effective_retry_policy(&self) -> RetryPolicy {
        self.retry_policy.unwrap_or_default()
    }

    pub fn log_file(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }

    /// Whether the task spawns an external command.
    pub fn is_command(&self) -> bool {
        matches!(self.work, TaskWork::Command(_))
    }
}
