//! Aggregate run state and the event reducer.
//!
//! [`SystemState`] is derived entirely from [`TaskEvent`]s. It is owned by the
//! [`StateCoordinator`](coordinator::StateCoordinator); everyone else only sees
//! immutable snapshots of it.

pub mod coordinator;
mod output;

pub use coordinator::{StateCoordinator, StateReceiver};
pub use output::OutputLines;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::core::types::TaskId;
use crate::events::{TaskEvent, TaskOutcome};

/// Status of a task within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Registered, waiting for dependencies or a concurrency slot.
    Pending,
    /// An attempt is in flight (including retry backoff).
    Running,
    /// Completed successfully.
    Succeeded,
    /// Completed with a failure after all attempts.
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Diagnostics for a failed command-backed task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandInfo {
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub exit_code: i32,
}

/// Derived state of a single task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskState {
    pub id: TaskId,
    pub name: String,
    pub status: TaskStatus,
    /// Every stdout line of every attempt, in order.
    pub stdout: OutputLines,
    /// Every stderr line of every attempt, in order.
    pub stderr: OutputLines,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub command_info: Option<CommandInfo>,
    pub retry_attempt: u32,
    pub max_retries: u32,
    /// First failed dependency that prevents this task from ever starting.
    pub blocked_by: Option<TaskId>,
    /// Value produced by a successful computation.
    pub result: Option<Value>,
}

impl TaskState {
    /// Fresh state right after registration.
    pub fn new(id: TaskId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            status: TaskStatus::Pending,
            stdout: OutputLines::new(),
            stderr: OutputLines::new(),
            started_at: None,
            completed_at: None,
            error: None,
            command_info: None,
            retry_attempt: 0,
            max_retries: 0,
            blocked_by: None,
            result: None,
        }
    }

    /// Wall-clock time between start and completion, once both are known.
    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.completed_at? - self.started_at?)
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked_by.is_some()
    }
}

/// Aggregate state of every task in a run, keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct SystemState {
    tasks: HashMap<TaskId, TaskState>,
}

impl SystemState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event into the state in place.
    ///
    /// Events for unknown task ids are ignored.
    pub fn apply(&mut self, event: &TaskEvent) {
        if let TaskEvent::Registered { id, name } = event {
            self.tasks
                .insert(id.clone(), TaskState::new(id.clone(), name.clone()));
            return;
        }

        let Some(task) = self.tasks.get_mut(event.task_id()) else {
            return;
        };

        match event {
            TaskEvent::Registered { .. } => {}
            TaskEvent::Started { timestamp, .. } => {
                task.status = TaskStatus::Running;
                task.started_at = Some(*timestamp);
            }
            TaskEvent::Retrying {
                attempt,
                max_attempts,
                ..
            } => {
                task.status = TaskStatus::Running;
                task.retry_attempt = *attempt;
                task.max_retries = max_attempts.saturating_sub(1);
            }
            TaskEvent::Stdout { line, .. } => task.stdout.push(line.clone()),
            TaskEvent::Stderr { line, .. } => task.stderr.push(line.clone()),
            TaskEvent::Blocked { dependency, .. } => {
                if task.blocked_by.is_none() {
                    task.blocked_by = Some(dependency.clone());
                }
            }
            TaskEvent::Completed {
                timestamp, outcome, ..
            } => {
                task.completed_at = Some(*timestamp);
                match outcome {
                    TaskOutcome::Success { result } => {
                        task.status = TaskStatus::Succeeded;
                        task.result = Some(result.clone());
                    }
                    TaskOutcome::Failure { error, command, .. } => {
                        task.status = TaskStatus::Failed;
                        task.error = Some(error.clone());
                        task.command_info = command.as_ref().map(|failure| CommandInfo {
                            command: failure.command.clone(),
                            args: failure.args.clone(),
                            working_dir: failure.working_dir.clone(),
                            exit_code: failure.exit_code,
                        });
                    }
                }
            }
        }
    }

    pub fn get(&self, id: &TaskId) -> Option<&TaskState> {
        self.tasks.get(id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaskState> {
        self.tasks.values()
    }

    /// Number of tasks currently in `status`.
    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.values().filter(|t| t.status == status).count()
    }

    /// Sorted ids of tasks currently in `status`.
    pub fn ids_with_status(&self, status: TaskStatus) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self
            .tasks
            .values()
            .filter(|t| t.status == status)
            .map(|t| t.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Sorted ids of tasks that will never start because a dependency failed.
    pub fn blocked_ids(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self
            .tasks
            .values()
            .filter(|t| t.is_blocked())
            .map(|t| t.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Whether every task reached a terminal status.
    pub fn is_settled(&self) -> bool {
        self.tasks.values().all(|t| t.status.is_terminal())
    }
}

/// Pure reducer: the state after applying `event` to `state`.
pub fn reduce(mut state: SystemState, event: &TaskEvent) -> SystemState {
    state.apply(event);
    state
}
