//! Testing utilities for users of the dagrun library.
//!
//! - [`FlakyComputation`]: fails N times, then succeeds
//! - [`ConcurrencyProbe`]: builds tasks that record how many ran at once
//! - [`RecordingRenderer`]: keeps every snapshot it is asked to render
//! - [`shell_task`]: a `sh -c` command task

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use crate::core::task::{Computation, TaskDefinition, TaskError};
use crate::core::types::TaskId;
use crate::events::TaskLogger;
use crate::execution::CommandSpec;
use crate::render::Renderer;
use crate::state::SystemState;

/// A computation that fails a fixed number of times, then succeeds.
///
/// Every call logs `attempt N` on the task's stdout.
///
/// # Example
///
/// ```
/// use dagrun::testing::FlakyComputation;
/// use dagrun::{RetryPolicy, TaskDefinition};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let flaky = Arc::new(FlakyComputation::new(2));
/// let task = TaskDefinition::compute("flaky", flaky.clone())
///     .with_retry(RetryPolicy::exponential(2, Duration::from_millis(10)));
/// assert_eq!(flaky.calls(), 0);
/// ```
#[derive(Debug)]
pub struct FlakyComputation {
    failures_remaining: AtomicU32,
    calls: AtomicU32,
    result: Value,
}

impl FlakyComputation {
    pub fn new(fail_count: u32) -> Self {
        Self {
            failures_remaining: AtomicU32::new(fail_count),
            calls: AtomicU32::new(0),
            result: Value::Null,
        }
    }

    /// Value returned once the computation succeeds.
    pub fn with_result(mut self, result: Value) -> Self {
        self.result = result;
        self
    }

    /// Number of times the computation was run.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Computation for FlakyComputation {
    async fn run(&self, log: TaskLogger) -> Result<Value, TaskError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        log.info(format!("attempt {call}"));

        let remaining = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match remaining {
            Ok(left) => Err(TaskError::failed(format!(
                "failing, {} more to go",
                left.saturating_sub(1)
            ))),
            Err(_) => Ok(self.result.clone()),
        }
    }
}

#[derive(Debug, Default)]
struct ProbeCounters {
    current: AtomicUsize,
    max: AtomicUsize,
}

/// Records the peak number of its tasks running at the same time.
#[derive(Debug, Clone, Default)]
pub struct ConcurrencyProbe {
    counters: Arc<ProbeCounters>,
}

impl ConcurrencyProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// A computation task that holds its slot for `duration`.
    pub fn task(&self, id: impl Into<TaskId>, duration: Duration) -> TaskDefinition {
        let counters = Arc::clone(&self.counters);
        TaskDefinition::compute_fn(id, move |_log| {
            let counters = Arc::clone(&counters);
            async move {
                let now = counters.current.fetch_add(1, Ordering::SeqCst) + 1;
                counters.max.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(duration).await;
                counters.current.fetch_sub(1, Ordering::SeqCst);
                Ok(Value::Null)
            }
        })
    }

    /// Highest number of probe tasks observed running at once.
    pub fn max_observed(&self) -> usize {
        self.counters.max.load(Ordering::SeqCst)
    }

    /// Probe tasks running right now.
    pub fn current(&self) -> usize {
        self.counters.current.load(Ordering::SeqCst)
    }
}

/// A renderer that keeps every snapshot.
#[derive(Debug, Default)]
pub struct RecordingRenderer {
    frames: Vec<SystemState>,
    final_state: Option<SystemState>,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshots passed to `render`, in order.
    pub fn frames(&self) -> &[SystemState] {
        &self.frames
    }

    /// Snapshot passed to `render_final`, if it was called.
    pub fn final_state(&self) -> Option<&SystemState> {
        self.final_state.as_ref()
    }
}

impl Renderer for RecordingRenderer {
    fn render(&mut self, state: &SystemState) {
        self.frames.push(state.clone());
    }

    fn render_final(&mut self, state: &SystemState) {
        self.final_state = Some(state.clone());
    }
}

/// A command task running `script` through `sh -c`.
pub fn shell_task(id: impl Into<TaskId>, script: &str) -> TaskDefinition {
    TaskDefinition::command(
        id,
        CommandSpec::builder("sh").args(["-c", script]).build(),
    )
}
