//! DAG execution engine.
//!
//! The `DagExecutor` runs every node of a [`TaskGraph`] as its own tokio task.
//! A node first waits on the completion signal of each dependency, then hands
//! its definition to the shared [`TaskExecutor`], whose semaphore enforces the
//! global concurrency ceiling. Nodes downstream of a failure never start.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{Instrument, debug, info_span, warn};

use crate::core::dag::TaskGraph;
use crate::core::task::TaskDefinition;
use crate::core::types::{RunId, TaskId};
use crate::events::{EventSender, TaskEvent, TaskOutcome};
use crate::runner::RunError;
use crate::state::coordinator::{DEFAULT_PUBLISH_INTERVAL, StateCallback};
use crate::state::{StateCoordinator, StateReceiver, SystemState};

use super::executor::{TaskExecutor, TaskResult};

/// How a node finished, as seen by its dependents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeOutcome {
    /// The task ran and succeeded.
    Succeeded,
    /// The task ran and failed after all attempts.
    Failed,
    /// The task never started because a dependency did not succeed.
    Blocked,
    /// The run was interrupted before the task could finish.
    Interrupted,
}

/// One-shot completion signal for a node. Consumed when fired.
///
/// If the owning node is dropped without firing (a panic), listeners observe
/// [`NodeOutcome::Failed`].
struct CompletionSignal {
    tx: watch::Sender<Option<NodeOutcome>>,
}

#[derive(Clone)]
struct CompletionListener {
    rx: watch::Receiver<Option<NodeOutcome>>,
}

impl CompletionSignal {
    fn new() -> (Self, CompletionListener) {
        let (tx, rx) = watch::channel(None);
        (Self { tx }, CompletionListener { rx })
    }

    fn fire(self, outcome: NodeOutcome) {
        self.tx.send_replace(Some(outcome));
    }
}

impl CompletionListener {
    async fn wait(mut self) -> NodeOutcome {
        match self.rx.wait_for(Option::is_some).await {
            Ok(outcome) => (*outcome).unwrap_or(NodeOutcome::Failed),
            Err(_) => NodeOutcome::Failed,
        }
    }
}

/// Result of executing a DAG.
#[derive(Debug, Clone)]
pub struct DagResult {
    pub run_id: RunId,
    /// Final state, after every event of the run was applied.
    pub state: SystemState,
    /// How each node finished.
    pub node_outcomes: HashMap<TaskId, NodeOutcome>,
    /// Executor results for each task that was handed to the executor.
    pub task_results: HashMap<TaskId, TaskResult>,
    /// Whether the interrupt fired during the run.
    pub interrupted: bool,
    /// Total duration of DAG execution.
    pub duration: Duration,
}

impl DagResult {
    /// Get the result for a specific task.
    pub fn get_task_result(&self, task_id: &TaskId) -> Option<&TaskResult> {
        self.task_results.get(task_id)
    }

    /// Number of nodes that finished with `outcome`.
    pub fn count(&self, outcome: NodeOutcome) -> usize {
        self.node_outcomes.values().filter(|o| **o == outcome).count()
    }
}

/// Executor for running DAGs with dependency management.
pub struct DagExecutor {
    /// Underlying task executor.
    task_executor: Arc<TaskExecutor>,
    publish_interval: Duration,
    on_state_change: Option<StateCallback>,
    snapshots: Arc<watch::Sender<Arc<SystemState>>>,
}

impl DagExecutor {
    /// Create a new DAG executor with the given task executor.
    pub fn new(task_executor: TaskExecutor) -> Self {
        let (snapshots, _) = watch::channel(Arc::new(SystemState::new()));
        Self {
            task_executor: Arc::new(task_executor),
            publish_interval: DEFAULT_PUBLISH_INTERVAL,
            on_state_change: None,
            snapshots: Arc::new(snapshots),
        }
    }

    /// Create a new DAG executor with default settings.
    pub fn with_concurrency(max_concurrency: usize) -> Self {
        Self::new(TaskExecutor::new(max_concurrency))
    }

    /// Builder: snapshot publishing cadence.
    pub fn with_publish_interval(mut self, interval: Duration) -> Self {
        self.publish_interval = interval;
        self
    }

    /// Builder: invoke `callback` on every published snapshot.
    pub fn with_state_callback(mut self, callback: StateCallback) -> Self {
        self.on_state_change = Some(callback);
        self
    }

    /// Builder: publish snapshots into an existing slot.
    pub fn with_snapshots(mut self, snapshots: Arc<watch::Sender<Arc<SystemState>>>) -> Self {
        self.snapshots = snapshots;
        self
    }

    /// Subscribe to state snapshots published while [`execute`](Self::execute) runs.
    pub fn subscribe(&self) -> StateReceiver {
        self.snapshots.subscribe()
    }

    pub fn max_concurrency(&self) -> usize {
        self.task_executor.max_concurrency()
    }

    /// Execute every task of the graph.
    ///
    /// Tasks are registered up front, then each node starts as soon as all
    /// of its dependencies succeeded, subject to the concurrency limit.
    /// Returns once every node has settled and every event is applied.
    ///
    /// Every call is a new run with its own [`RunId`].
    pub async fn execute(&self, graph: &TaskGraph) -> Result<DagResult, RunError> {
        let run_id = RunId::new();
        let span = info_span!(
            "dag_run",
            run = %run_id,
            task_count = graph.len(),
            concurrency = self.max_concurrency(),
        );

        self.execute_inner(graph, run_id).instrument(span).await
    }

    async fn execute_inner(&self, graph: &TaskGraph, run_id: RunId) -> Result<DagResult, RunError> {
        let start_time = Instant::now();
        debug!(task_count = graph.len(), "starting DAG execution");

        let (events, rx) = EventSender::channel();

        // Queued before the coordinator starts, so no snapshot misses a task.
        let mut registered = SystemState::new();
        for task in graph.tasks() {
            let event = TaskEvent::Registered {
                id: task.id().clone(),
                name: task.name().to_string(),
            };
            registered.apply(&event);
            events.emit(event);
        }
        // Subscribers must not see a previous run's state.
        self.snapshots.send_replace(Arc::new(registered));

        let mut coordinator = StateCoordinator::new(rx, self.publish_interval)
            .with_publisher(Arc::clone(&self.snapshots));
        if let Some(callback) = &self.on_state_change {
            coordinator = coordinator.with_callback(Arc::clone(callback));
        }
        let coordinator = tokio::spawn(coordinator.run().in_current_span());

        let mut signals: HashMap<TaskId, CompletionSignal> = HashMap::new();
        let mut listeners: HashMap<TaskId, CompletionListener> = HashMap::new();
        for id in graph.topological_order() {
            let (signal, listener) = CompletionSignal::new();
            signals.insert(id.clone(), signal);
            listeners.insert(id.clone(), listener);
        }

        let mut nodes = JoinSet::new();
        for task in graph.tasks() {
            let id = task.id().clone();
            let Some(signal) = signals.remove(&id) else {
                continue;
            };
            let dependencies: Vec<(TaskId, CompletionListener)> = graph
                .dependencies_of(&id)
                .iter()
                .filter_map(|dep| listeners.get(dep).map(|l| (dep.clone(), l.clone())))
                .collect();

            let node = Node {
                task: Arc::clone(task),
                dependencies,
                signal,
                executor: Arc::clone(&self.task_executor),
                events: events.clone(),
                run_id,
            };
            nodes.spawn(node.run().instrument(info_span!("dag_node", task = %id)));
        }
        drop(listeners);
        drop(events);

        let mut node_outcomes = HashMap::new();
        let mut task_results = HashMap::new();
        while let Some(joined) = nodes.join_next().await {
            match joined {
                Ok((id, outcome, result)) => {
                    node_outcomes.insert(id.clone(), outcome);
                    if let Some(result) = result {
                        task_results.insert(id, result);
                    }
                }
                Err(err) => warn!(error = %err, "task node aborted"),
            }
        }

        let state = coordinator
            .await
            .map_err(|err| RunError::Coordinator(err.to_string()))?;

        let interrupted = self.task_executor.interrupt().is_triggered();
        let duration = start_time.elapsed();

        debug!(
            duration_ms = %duration.as_millis(),
            succeeded = node_outcomes.values().filter(|o| **o == NodeOutcome::Succeeded).count(),
            failed = node_outcomes.values().filter(|o| **o == NodeOutcome::Failed).count(),
            blocked = node_outcomes.values().filter(|o| **o == NodeOutcome::Blocked).count(),
            interrupted = interrupted,
            "DAG execution completed"
        );

        Ok(DagResult {
            run_id,
            state,
            node_outcomes,
            task_results,
            interrupted,
            duration,
        })
    }
}

impl Default for DagExecutor {
    fn default() -> Self {
        Self::with_concurrency(4)
    }
}

/// Everything one spawned node needs.
struct Node {
    task: Arc<TaskDefinition>,
    dependencies: Vec<(TaskId, CompletionListener)>,
    signal: CompletionSignal,
    executor: Arc<TaskExecutor>,
    events: EventSender,
    run_id: RunId,
}

impl Node {
    async fn run(self) -> (TaskId, NodeOutcome, Option<TaskResult>) {
        let Node {
            task,
            dependencies,
            signal,
            executor,
            events,
            run_id,
        } = self;
        let id = task.id().clone();

        // All dependencies are watched at once so the first failure blocks
        // this node without waiting on slower siblings.
        let mut pending = JoinSet::new();
        for (dependency, listener) in dependencies {
            pending.spawn(async move { (dependency, listener.wait().await) });
        }

        loop {
            let joined = tokio::select! {
                biased;
                _ = executor.interrupt().triggered() => None,
                joined = pending.join_next() => match joined {
                    Some(joined) => Some(joined),
                    None => break,
                },
            };

            let outcome = match joined {
                Some(Ok((_, NodeOutcome::Succeeded))) => continue,
                Some(Ok((dependency, NodeOutcome::Failed | NodeOutcome::Blocked))) => {
                    debug!(dependency = %dependency, "dependency did not succeed, task blocked");
                    events.for_task(id.clone()).blocked(dependency);
                    NodeOutcome::Blocked
                }
                Some(Ok((_, NodeOutcome::Interrupted))) | None => NodeOutcome::Interrupted,
                Some(Err(err)) => {
                    // Only a runtime shutdown cancels a dependency watcher.
                    warn!(error = %err, "dependency watcher cancelled");
                    NodeOutcome::Interrupted
                }
            };
            signal.fire(outcome);
            return (id, outcome, None);
        }

        let result = executor.execute_in_run(&task, &events, run_id).await;
        let outcome = match &result.outcome {
            TaskOutcome::Success { .. } => NodeOutcome::Succeeded,
            TaskOutcome::Failure {
                interrupted: true, ..
            } => NodeOutcome::Interrupted,
            TaskOutcome::Failure { .. } => NodeOutcome::Failed,
        };
        signal.fire(outcome);
        (id, outcome, Some(result))
    }
}
