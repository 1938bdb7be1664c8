//! Task execution engine.
//!
//! The `TaskExecutor` runs one task definition to completion:
//! - Concurrency limiting via semaphore (held from `Started` to `Completed`)
//! - Retry loop with exponential backoff
//! - Optional log-file report of the final attempt

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::command::run_command;
use super::interrupt::Interrupt;
use crate::core::task::{TaskDefinition, TaskError, TaskWork};
use crate::core::types::{RunId, TaskId};
use crate::events::{CapturedOutput, EventSender, TaskEmitter, TaskOutcome};

/// Result of executing a task.
#[derive(Debug, Clone)]
pub struct TaskResult {
    /// The task that was executed.
    pub task_id: TaskId,
    /// Outcome of the final attempt.
    pub outcome: TaskOutcome,
    /// Number of attempts made (0 = never started, 1 = first try, 2+ = retries).
    pub attempts: u32,
    /// Total duration of all attempts and backoff sleeps.
    pub duration: Duration,
}

impl TaskResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    /// Whether the task got a concurrency slot and emitted `Started`.
    pub fn was_started(&self) -> bool {
        self.attempts > 0
    }

    fn not_started(task_id: TaskId) -> Self {
        Self {
            task_id,
            outcome: TaskOutcome::from_error(&TaskError::Interrupted),
            attempts: 0,
            duration: Duration::ZERO,
        }
    }
}

/// Executor for running tasks with concurrency control and retry logic.
#[derive(Debug)]
pub struct TaskExecutor {
    /// Maximum number of concurrent task executions.
    max_concurrency: usize,
    /// Semaphore for concurrency control.
    semaphore: Arc<Semaphore>,
    interrupt: Interrupt,
    run_id: RunId,
}

impl TaskExecutor {
    /// Create a new executor with the given concurrency limit (at least 1).
    pub fn new(max_concurrency: usize) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            max_concurrency,
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            interrupt: Interrupt::new(),
            run_id: RunId::new(),
        }
    }

    /// Builder: cancel in-flight work when `interrupt` fires.
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Builder: run id written into log-file headers by [`execute`](Self::execute).
    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = run_id;
        self
    }

    /// Get the maximum concurrency limit.
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Get the number of available permits (slots for concurrent execution).
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }

    /// Execute a task with retry logic, emitting its lifecycle events.
    ///
    /// This method will:
    /// 1. Acquire a concurrency permit, then emit `Started`
    /// 2. Run attempts until one succeeds or the retry policy is exhausted
    /// 3. Write the log file, if any
    /// 4. Emit `Completed` and release the permit
    ///
    /// If the interrupt fires before a permit is acquired, nothing is emitted
    /// and the result reports zero attempts.
    pub async fn execute(&self, task: &TaskDefinition, events: &EventSender) -> TaskResult {
        self.execute_in_run(task, events, self.run_id).await
    }

    /// Like [`execute`](Self::execute), but log files are stamped with `run_id`.
    pub async fn execute_in_run(
        &self,
        task: &TaskDefinition,
        events: &EventSender,
        run_id: RunId,
    ) -> TaskResult {
        let task_id = task.id().clone();

        let permit = tokio::select! {
            biased;
            _ = self.interrupt.triggered() => return TaskResult::not_started(task_id),
            permit = Arc::clone(&self.semaphore).acquire_owned() => permit,
        };
        let Ok(_permit) = permit else {
            return TaskResult::not_started(task_id);
        };

        let mut emitter = events.for_task(task_id.clone());
        if task.log_file().is_some() {
            emitter = emitter.with_capture();
        }

        let started_at = Utc::now();
        let start_time = Instant::now();
        emitter.started();

        let policy = task.effective_retry_policy();
        let max_attempts = policy.max_attempts();
        let mut attempt = 0u32;

        let outcome = loop {
            emitter.reset_capture();

            match self.run_attempt(task, &emitter).await {
                Ok(result) => break TaskOutcome::Success { result },
                Err(err) if !err.is_interrupted() && policy.should_retry(attempt) => {
                    let delay = policy.delay_for(attempt);
                    warn!(
                        task = %task_id,
                        attempt = attempt + 1,
                        max_attempts = max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "attempt failed, retrying"
                    );

                    attempt += 1;
                    emitter.retrying(attempt, max_attempts);

                    tokio::select! {
                        _ = sleep(delay) => {}
                        _ = self.interrupt.triggered() => {
                            break TaskOutcome::from_error(&TaskError::Interrupted);
                        }
                    }
                }
                Err(err) => {
                    debug!(task = %task_id, attempt = attempt + 1, error = %err, "task failed");
                    break TaskOutcome::from_error(&err);
                }
            }
        };

        let duration = start_time.elapsed();

        if let Some(path) = task.log_file() {
            let report = LogReport {
                task_id: &task_id,
                outcome: &outcome,
                duration,
                started_at,
                run_id,
                output: emitter.captured(),
            };
            if let Err(err) = report.write(path).await {
                warn!(task = %task_id, path = %path.display(), error = %err, "failed to write log file");
            }
        }

        emitter.completed(outcome.clone());

        TaskResult {
            task_id,
            outcome,
            attempts: attempt + 1,
            duration,
        }
    }

    async fn run_attempt(
        &self,
        task: &TaskDefinition,
        emitter: &TaskEmitter,
    ) -> Result<Value, TaskError> {
        match task.work() {
            TaskWork::Command(spec) => run_command(spec, emitter, &self.interrupt)
                .await
                .map(|()| Value::Null),
            TaskWork::Compute(computation) => {
                tokio::select! {
                    result = computation.run(emitter.logger()) => result,
                    _ = self.interrupt.triggered() => Err(TaskError::Interrupted),
                }
            }
        }
    }
}

impl Default for TaskExecutor {
    fn default() -> Self {
        Self::new(4) // Default to 4 concurrent tasks
    }
}

/// Plain-text report persisted to a task's log file.
struct LogReport<'a> {
    task_id: &'a TaskId,
    outcome: &'a TaskOutcome,
    duration: Duration,
    started_at: DateTime<Utc>,
    run_id: RunId,
    output: CapturedOutput,
}

impl LogReport<'_> {
    fn render(&self) -> String {
        let status = if self.outcome.is_success() {
            "succeeded"
        } else {
            "failed"
        };

        let mut text = String::new();
        text.push_str(&format!("# Task: {}\n", self.task_id));
        text.push_str(&format!("# Status: {}\n", status));
        text.push_str(&format!("# Duration: {:.3}s\n", self.duration.as_secs_f64()));
        text.push_str(&format!("# Started: {}\n", self.started_at.to_rfc3339()));
        text.push_str(&format!("# Run: {}\n", self.run_id));
        if let TaskOutcome::Failure { error, .. } = self.outcome {
            text.push_str(&format!("# Error: {}\n", error));
        }

        text.push_str("\n--- stdout ---\n");
        for line in &self.output.stdout {
            text.push_str(line);
            text.push('\n');
        }
        text.push_str("\n--- stderr ---\n");
        for line in &self.output.stderr {
            text.push_str(line);
            text.push('\n');
        }
        text
    }

    async fn write(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, self.render()).await
    }
}
