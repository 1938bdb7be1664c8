//! Presentation of run state.
//!
//! Renderers only ever read snapshots; they have no way to influence
//! scheduling. [`drive`] feeds a renderer from a snapshot subscription and
//! calls [`Renderer::render_final`] once the run is over.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::core::types::TaskId;
use crate::state::{StateReceiver, SystemState, TaskState, TaskStatus};

/// Consumer of state snapshots.
pub trait Renderer {
    /// Called for every published snapshot while the run is in progress.
    fn render(&mut self, state: &SystemState);

    /// Called once with the final state after the run completes.
    fn render_final(&mut self, state: &SystemState);
}

/// Render every snapshot from `snapshots`, then the final one.
///
/// Returns when the publishing side is dropped, i.e. after the run ended.
pub async fn drive<R: Renderer + ?Sized>(renderer: &mut R, mut snapshots: StateReceiver) {
    while snapshots.changed().await.is_ok() {
        let snapshot = Arc::clone(&snapshots.borrow_and_update());
        renderer.render(&snapshot);
    }
    let last = Arc::clone(&snapshots.borrow());
    renderer.render_final(&last);
}

#[derive(Debug, Default, Clone, Copy)]
struct Progress {
    status: Option<TaskStatus>,
    stdout: usize,
    stderr: usize,
    retry_attempt: u32,
    blocked: bool,
}

/// Renders state changes as log lines, the way a CI log would show them.
///
/// Only what changed since the previous snapshot is logged.
#[derive(Debug, Default)]
pub struct TracingRenderer {
    seen: HashMap<TaskId, Progress>,
}

impl TracingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    fn render_task(&mut self, task: &TaskState) {
        let progress = self.seen.entry(task.id.clone()).or_default();
        let id = &task.id;

        let was_waiting = progress.status.is_none_or(|s| s == TaskStatus::Pending);
        if was_waiting && task.status != TaskStatus::Pending {
            info!(task = %id, "started");
        }

        if task.retry_attempt > progress.retry_attempt {
            warn!(
                task = %id,
                attempt = task.retry_attempt,
                max_retries = task.max_retries,
                "retrying"
            );
        }

        for line in task.stdout.iter_from(progress.stdout) {
            info!(task = %id, "{}", line);
        }
        for line in task.stderr.iter_from(progress.stderr) {
            warn!(task = %id, "{}", line);
        }

        if progress.status != Some(task.status) {
            match task.status {
                TaskStatus::Succeeded => {
                    let ms = task.duration().map(|d| d.num_milliseconds()).unwrap_or(0);
                    info!(task = %id, duration_ms = ms, "succeeded");
                }
                TaskStatus::Failed => match &task.command_info {
                    Some(info) => error!(
                        task = %id,
                        exit_code = info.exit_code,
                        "failed: {}",
                        task.error.as_deref().unwrap_or("unknown error")
                    ),
                    None => error!(
                        task = %id,
                        "failed: {}",
                        task.error.as_deref().unwrap_or("unknown error")
                    ),
                },
                TaskStatus::Pending | TaskStatus::Running => {}
            }
        }

        if let (Some(dependency), false) = (&task.blocked_by, progress.blocked) {
            warn!(task = %id, dependency = %dependency, "skipped, dependency failed");
        }

        *progress = Progress {
            status: Some(task.status),
            stdout: task.stdout.len(),
            stderr: task.stderr.len(),
            retry_attempt: task.retry_attempt,
            blocked: task.is_blocked(),
        };
    }

    /// Lines already rendered for `id` as (stdout, stderr).
    pub fn rendered_lines(&self, id: &TaskId) -> (usize, usize) {
        self.seen
            .get(id)
            .map(|p| (p.stdout, p.stderr))
            .unwrap_or_default()
    }
}

impl Renderer for TracingRenderer {
    fn render(&mut self, state: &SystemState) {
        let mut tasks: Vec<&TaskState> = state.iter().collect();
        tasks.sort_by(|a, b| a.id.cmp(&b.id));
        for task in tasks {
            self.render_task(task);
        }
    }

    fn render_final(&mut self, state: &SystemState) {
        self.render(state);
        info!(
            succeeded = state.count(TaskStatus::Succeeded),
            failed = state.count(TaskStatus::Failed),
            pending = state.count(TaskStatus::Pending),
            "all tasks settled"
        );
    }
}
