//! Common test utilities shared across integration tests.

use dagrun::{SystemState, TaskDefinition, TaskError, TaskStatus};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A computation task that succeeds immediately.
pub fn ok_task(id: &str) -> TaskDefinition {
    TaskDefinition::compute_fn(id, |_log| async { Ok(Value::Null) })
}

/// A computation task that always fails.
pub fn failing_task(id: &str) -> TaskDefinition {
    TaskDefinition::compute_fn(id, |_log| async {
        Err(TaskError::failed("intentional failure"))
    })
}

/// A computation task that sleeps before succeeding.
pub fn sleeping_task(id: &str, duration: Duration) -> TaskDefinition {
    TaskDefinition::compute_fn(id, move |_log| async move {
        tokio::time::sleep(duration).await;
        Ok(Value::Null)
    })
}

/// Collects every snapshot passed to a state callback.
#[derive(Clone, Default)]
pub struct SnapshotLog {
    snapshots: Arc<Mutex<Vec<SystemState>>>,
}

impl SnapshotLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Callback suitable for `RunOptions::on_state_change`.
    pub fn callback(&self) -> impl Fn(&SystemState) + Send + Sync + 'static {
        let snapshots = Arc::clone(&self.snapshots);
        move |state: &SystemState| snapshots.lock().unwrap().push(state.clone())
    }

    pub fn snapshots(&self) -> Vec<SystemState> {
        self.snapshots.lock().unwrap().clone()
    }

    /// Highest number of tasks seen `running` in a single snapshot.
    pub fn max_running(&self) -> usize {
        self.snapshots()
            .iter()
            .map(|state| state.count(TaskStatus::Running))
            .max()
            .unwrap_or(0)
    }
}
