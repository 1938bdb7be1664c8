//! Task lifecycle events and the producer side of the event queue.
//!
//! Executors never touch shared state. They describe what happened as
//! [`TaskEvent`]s and push them into a single unbounded multi-producer queue;
//! the state coordinator is the only consumer.
//!
//! Per task the order is always `Registered`, `Started`, then any mix of
//! `Retrying`/`Stdout`/`Stderr`, then `Completed`. Nothing is guaranteed
//! across tasks.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::trace;

use crate::core::task::{CommandFailure, TaskError};
use crate::core::types::TaskId;

/// Terminal outcome of a task, carried by [`TaskEvent::Completed`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// The final attempt succeeded with a result value.
    Success { result: Value },
    /// The final attempt failed.
    Failure {
        /// Human-readable cause.
        error: String,
        /// Present when a command exited with a nonzero code.
        command: Option<CommandFailure>,
        /// Set when the task was cut short by an interrupt.
        interrupted: bool,
    },
}

impl TaskOutcome {
    /// Build a failure outcome from a task error.
    pub fn from_error(err: &TaskError) -> Self {
        TaskOutcome::Failure {
            error: err.to_string(),
            command: err.command_failure().cloned(),
            interrupted: err.is_interrupted(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Success { .. })
    }
}

/// A timestamped fact about one task's progress.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    /// The task is part of the run. Emitted for every task before any starts.
    Registered { id: TaskId, name: String },

    /// The task acquired a concurrency slot and began its first attempt.
    Started {
        id: TaskId,
        timestamp: DateTime<Utc>,
    },

    /// An attempt failed and another one is scheduled after backoff.
    Retrying {
        id: TaskId,
        /// The upcoming attempt (1-indexed retry count).
        attempt: u32,
        /// Total attempts allowed, including the first.
        max_attempts: u32,
        timestamp: DateTime<Utc>,
    },

    /// One line of standard output.
    Stdout { id: TaskId, line: String },

    /// One line of standard error.
    Stderr { id: TaskId, line: String },

    /// A dependency failed, so this task will never start.
    Blocked { id: TaskId, dependency: TaskId },

    /// The task reached its terminal outcome.
    Completed {
        id: TaskId,
        timestamp: DateTime<Utc>,
        outcome: TaskOutcome,
    },
}

impl TaskEvent {
    /// The task this event refers to.
    pub fn task_id(&self) -> &TaskId {
        match self {
            TaskEvent::Registered { id, .. }
            | TaskEvent::Started { id, .. }
            | TaskEvent::Retrying { id, .. }
            | TaskEvent::Stdout { id, .. }
            | TaskEvent::Stderr { id, .. }
            | TaskEvent::Blocked { id, .. }
            | TaskEvent::Completed { id, .. } => id,
        }
    }

    /// Create a Started event stamped with the current time.
    pub fn started(id: TaskId) -> Self {
        TaskEvent::Started {
            id,
            timestamp: Utc::now(),
        }
    }

    /// Create a Retrying event stamped with the current time.
    pub fn retrying(id: TaskId, attempt: u32, max_attempts: u32) -> Self {
        TaskEvent::Retrying {
            id,
            attempt,
            max_attempts,
            timestamp: Utc::now(),
        }
    }

    /// Create a Completed event stamped with the current time.
    pub fn completed(id: TaskId, outcome: TaskOutcome) -> Self {
        TaskEvent::Completed {
            id,
            timestamp: Utc::now(),
            outcome,
        }
    }
}

/// Receiving half of the event queue, owned by the state coordinator.
pub type EventReceiver = mpsc::UnboundedReceiver<TaskEvent>;

/// Producer handle for the event queue. Cheap to clone; sending never blocks.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<TaskEvent>,
}

impl EventSender {
    /// Create a new queue and return both halves.
    pub fn channel() -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Push an event. Events sent after the coordinator stopped are dropped.
    pub fn emit(&self, event: TaskEvent) {
        if let Err(err) = self.tx.send(event) {
            trace!(task = %err.0.task_id(), "event dropped; coordinator has stopped");
        }
    }

    /// Emitter bound to a single task.
    pub fn for_task(&self, id: TaskId) -> TaskEmitter {
        TaskEmitter {
            id,
            sender: self.clone(),
            capture: None,
        }
    }
}

/// Output lines captured for one attempt, used for log-file persistence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

/// Event producer bound to one task.
///
/// When capture is enabled it also keeps the current attempt's output lines
/// so the executor can write them to the task's log file.
#[derive(Debug, Clone)]
pub struct TaskEmitter {
    id: TaskId,
    sender: EventSender,
    capture: Option<Arc<Mutex<CapturedOutput>>>,
}

impl TaskEmitter {
    /// Builder: keep a copy of emitted output lines.
    pub fn with_capture(mut self) -> Self {
        self.capture = Some(Arc::new(Mutex::new(CapturedOutput::default())));
        self
    }

    pub fn task_id(&self) -> &TaskId {
        &self.id
    }

    pub fn started(&self) {
        self.sender.emit(TaskEvent::started(self.id.clone()));
    }

    pub fn retrying(&self, attempt: u32, max_attempts: u32) {
        self.sender
            .emit(TaskEvent::retrying(self.id.clone(), attempt, max_attempts));
    }

    pub fn stdout(&self, line: impl Into<String>) {
        let line = line.into();
        self.with_captured(|out| out.stdout.push(line.clone()));
        self.sender.emit(TaskEvent::Stdout {
            id: self.id.clone(),
            line,
        });
    }

    pub fn stderr(&self, line: impl Into<String>) {
        let line = line.into();
        self.with_captured(|out| out.stderr.push(line.clone()));
        self.sender.emit(TaskEvent::Stderr {
            id: self.id.clone(),
            line,
        });
    }

    pub fn blocked(&self, dependency: TaskId) {
        self.sender.emit(TaskEvent::Blocked {
            id: self.id.clone(),
            dependency,
        });
    }

    pub fn completed(&self, outcome: TaskOutcome) {
        self.sender
            .emit(TaskEvent::completed(self.id.clone(), outcome));
    }

    /// Forget captured lines; called at the start of every attempt.
    pub fn reset_capture(&self) {
        self.with_captured(|out| *out = CapturedOutput::default());
    }

    /// Lines captured during the current attempt.
    pub fn captured(&self) -> CapturedOutput {
        let mut snapshot = CapturedOutput::default();
        self.with_captured(|out| snapshot = out.clone());
        snapshot
    }

    /// Logging side-channel handed to computations.
    pub fn logger(&self) -> TaskLogger {
        TaskLogger {
            emitter: self.clone(),
        }
    }

    fn with_captured(&self, f: impl FnOnce(&mut CapturedOutput)) {
        if let Some(capture) = &self.capture {
            // A poisoned lock only means another thread panicked mid-push.
            let mut guard = capture.lock().unwrap_or_else(|e| e.into_inner());
            f(&mut guard);
        }
    }
}

/// Logging handle given to a [`Computation`](crate::Computation).
///
/// Lines written here become `Stdout`/`Stderr` events of the task.
#[derive(Debug, Clone)]
pub struct TaskLogger {
    emitter: TaskEmitter,
}

impl TaskLogger {
    /// Emit a line on the task's stdout stream.
    pub fn info(&self, line: impl Into<String>) {
        self.emitter.stdout(line);
    }

    /// Emit a line on the task's stderr stream.
    pub fn error(&self, line: impl Into<String>) {
        self.emitter.stderr(line);
    }

    pub fn task_id(&self) -> &TaskId {
        self.emitter.task_id()
    }
}
