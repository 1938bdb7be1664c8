//! Run entrypoint: build the graph, execute it, summarize the outcome.
//!
//! ```no_run
//! use dagrun::{CommandSpec, RunOptions, TaskDefinition, run_task_graph};
//!
//! # async fn demo() -> Result<(), dagrun::RunError> {
//! let tasks = vec![
//!     TaskDefinition::command("lint", CommandSpec::builder("cargo").arg("clippy").build()),
//!     TaskDefinition::command("test", CommandSpec::builder("cargo").arg("test").build())
//!         .depends_on("lint"),
//! ];
//!
//! let summary = run_task_graph(tasks, RunOptions::new().concurrency(2)).await?;
//! println!("{} succeeded, {} failed", summary.success_count, summary.failure_count);
//! # Ok(())
//! # }
//! ```

use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::info;

use crate::core::dag::{GraphError, TaskGraph};
use crate::core::task::TaskDefinition;
use crate::core::types::{RunId, TaskId};
use crate::execution::{DagExecutor, DagResult, Interrupt, TaskExecutor};
use crate::state::coordinator::{DEFAULT_PUBLISH_INTERVAL, StateCallback};
use crate::state::{StateReceiver, SystemState, TaskStatus};

/// Default number of tasks allowed to run at once.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Errors surfaced by a run as a whole.
#[derive(Debug, Error)]
pub enum RunError {
    /// The task set does not form a valid DAG. Nothing was executed.
    #[error("invalid task graph: {0}")]
    Graph(#[from] GraphError),

    /// Strict mode: at least one task failed.
    #[error("{count} task(s) failed: {}", join_ids(.task_ids))]
    TasksFailed { count: usize, task_ids: Vec<TaskId> },

    /// The state coordinator stopped unexpectedly.
    #[error("state coordinator failed: {0}")]
    Coordinator(String),
}

fn join_ids(ids: &[TaskId]) -> String {
    ids.iter()
        .map(TaskId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Options for a single run.
#[derive(Clone)]
pub struct RunOptions {
    concurrency: usize,
    publish_interval: Duration,
    strict: bool,
    on_state_change: Option<StateCallback>,
    interrupt: Option<Interrupt>,
    snapshots: Arc<watch::Sender<Arc<SystemState>>>,
}

impl RunOptions {
    pub fn new() -> Self {
        let (snapshots, _) = watch::channel(Arc::new(SystemState::new()));
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            publish_interval: DEFAULT_PUBLISH_INTERVAL,
            strict: false,
            on_state_change: None,
            interrupt: None,
            snapshots: Arc::new(snapshots),
        }
    }

    /// Subscribe to snapshots of the run these options are used for.
    ///
    /// The subscription closes once the run returns.
    pub fn subscribe(&self) -> StateReceiver {
        self.snapshots.subscribe()
    }

    /// Maximum tasks running at once. Zero is treated as one.
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// How often state snapshots are published.
    pub fn publish_interval(mut self, interval: Duration) -> Self {
        self.publish_interval = interval;
        self
    }

    /// Fail the run with [`RunError::TasksFailed`] when any task failed.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Called with every published snapshot.
    pub fn on_state_change<F>(mut self, callback: F) -> Self
    where
        F: Fn(&SystemState) + Send + Sync + 'static,
    {
        self.on_state_change = Some(Arc::new(callback));
        self
    }

    pub fn interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    pub fn get_concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunOptions")
            .field("concurrency", &self.concurrency)
            .field("publish_interval", &self.publish_interval)
            .field("strict", &self.strict)
            .field("on_state_change", &self.on_state_change.is_some())
            .field("interrupt", &self.interrupt)
            .finish()
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: RunId,
    /// Final state of every task.
    pub state: SystemState,
    pub success_count: usize,
    pub failure_count: usize,
    /// Sorted ids of failed tasks.
    pub failed_task_ids: Vec<TaskId>,
    /// Sorted ids of tasks that never started because a dependency failed.
    pub blocked_task_ids: Vec<TaskId>,
    pub interrupted: bool,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
}

impl RunSummary {
    pub fn from_result(result: DagResult) -> Self {
        let failed_task_ids = result.state.ids_with_status(TaskStatus::Failed);
        Self {
            run_id: result.run_id,
            success_count: result.state.count(TaskStatus::Succeeded),
            failure_count: failed_task_ids.len(),
            failed_task_ids,
            blocked_task_ids: result.state.blocked_ids(),
            interrupted: result.interrupted,
            duration: result.duration,
            state: result.state,
        }
    }

    /// Whether every task succeeded.
    pub fn is_success(&self) -> bool {
        self.failure_count == 0 && self.success_count == self.state.len()
    }

    /// Convert failures into [`RunError::TasksFailed`].
    pub fn into_result(self) -> Result<Self, RunError> {
        if self.failure_count > 0 {
            return Err(RunError::TasksFailed {
                count: self.failure_count,
                task_ids: self.failed_task_ids,
            });
        }
        Ok(self)
    }
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

/// Run a set of tasks to completion.
///
/// Graph errors are returned before any task starts. Task failures are
/// reported through the summary, or as [`RunError::TasksFailed`] when the
/// options are strict.
pub async fn run_task_graph(
    tasks: impl IntoIterator<Item = TaskDefinition>,
    options: RunOptions,
) -> Result<RunSummary, RunError> {
    let graph = TaskGraph::build(tasks)?;

    let mut task_executor = TaskExecutor::new(options.concurrency);
    if let Some(interrupt) = &options.interrupt {
        task_executor = task_executor.with_interrupt(interrupt.clone());
    }

    let mut executor = DagExecutor::new(task_executor)
        .with_publish_interval(options.publish_interval)
        .with_snapshots(Arc::clone(&options.snapshots));
    if let Some(callback) = &options.on_state_change {
        executor = executor.with_state_callback(Arc::clone(callback));
    }

    let summary = RunSummary::from_result(executor.execute(&graph).await?);
    info!(
        run = %summary.run_id,
        succeeded = summary.success_count,
        failed = summary.failure_count,
        blocked = summary.blocked_task_ids.len(),
        duration_ms = summary.duration.as_millis() as u64,
        "run finished"
    );

    if options.strict {
        summary.into_result()
    } else {
        Ok(summary)
    }
}

/// Like [`run_task_graph`], but always strict.
pub async fn run_task_graph_or_fail(
    tasks: impl IntoIterator<Item = TaskDefinition>,
    options: RunOptions,
) -> Result<RunSummary, RunError> {
    run_task_graph(tasks, options.strict(true)).await
}
