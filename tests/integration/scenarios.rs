//! Scheduling scenario tests.
//!
//! Tests that verify ordering, failure blocking, retries and the
//! concurrency ceiling through the public run entrypoint.

use crate::common::{SnapshotLog, failing_task, ok_task, sleeping_task};
use dagrun::testing::{ConcurrencyProbe, FlakyComputation};
use dagrun::{
    EventSender, GraphError, RetryPolicy, RunError, RunOptions, TaskDefinition, TaskEvent,
    TaskExecutor, TaskId, TaskStatus, run_task_graph, run_task_graph_or_fail,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

fn fast_options() -> RunOptions {
    RunOptions::new().publish_interval(Duration::from_millis(1))
}

/// Test: linear chain A -> B -> C runs in order and all succeed.
#[tokio::test]
async fn test_linear_chain_runs_in_order() {
    let tasks = vec![
        sleeping_task("a", Duration::from_millis(10)),
        sleeping_task("b", Duration::from_millis(10)).depends_on("a"),
        sleeping_task("c", Duration::from_millis(10)).depends_on("b"),
    ];

    let summary = run_task_graph(tasks, fast_options()).await.unwrap();

    assert_eq!(summary.success_count, 3);
    assert_eq!(summary.failure_count, 0);
    assert!(summary.is_success());

    let state = &summary.state;
    let a = state.get(&TaskId::new("a")).unwrap();
    let b = state.get(&TaskId::new("b")).unwrap();
    let c = state.get(&TaskId::new("c")).unwrap();
    for task in [a, b, c] {
        assert_eq!(task.status, TaskStatus::Succeeded);
    }
    assert!(a.completed_at.unwrap() <= b.started_at.unwrap());
    assert!(b.completed_at.unwrap() <= c.started_at.unwrap());
}

/// Test: diamond A -> {B, C} -> D where A fails leaves the rest pending.
#[tokio::test]
async fn test_diamond_with_failed_root() {
    let tasks = vec![
        failing_task("a"),
        ok_task("b").depends_on("a"),
        ok_task("c").depends_on("a"),
        ok_task("d").with_dependencies(["b", "c"]),
    ];

    let summary = run_task_graph(tasks, fast_options()).await.unwrap();

    assert_eq!(summary.failure_count, 1);
    assert_eq!(summary.success_count, 0);
    assert_eq!(summary.failed_task_ids, vec![TaskId::new("a")]);

    let state = &summary.state;
    assert_eq!(state.get(&TaskId::new("a")).unwrap().status, TaskStatus::Failed);
    for id in ["b", "c", "d"] {
        let task = state.get(&TaskId::new(id)).unwrap();
        assert_eq!(task.status, TaskStatus::Pending, "task {id}");
        assert!(task.started_at.is_none());
        assert!(task.is_blocked());
    }
    assert_eq!(
        state.get(&TaskId::new("b")).unwrap().blocked_by,
        Some(TaskId::new("a"))
    );
    assert_eq!(summary.blocked_task_ids.len(), 3);
}

/// Test: a failure does not stop unrelated branches.
#[tokio::test]
async fn test_failure_does_not_stop_siblings() {
    let tasks = vec![
        failing_task("broken"),
        ok_task("after_broken").depends_on("broken"),
        sleeping_task("independent", Duration::from_millis(20)),
        ok_task("after_independent").depends_on("independent"),
    ];

    let summary = run_task_graph(tasks, fast_options()).await.unwrap();

    assert_eq!(summary.success_count, 2);
    assert_eq!(summary.failure_count, 1);
    assert_eq!(summary.blocked_task_ids, vec![TaskId::new("after_broken")]);
}

/// Test: no task is seen running before its dependencies succeeded.
#[tokio::test]
async fn test_no_task_runs_before_its_dependencies() {
    let graph: Vec<(&str, Vec<&str>)> = vec![
        ("fetch", vec![]),
        ("config", vec![]),
        ("compile", vec!["fetch", "config"]),
        ("docs", vec!["fetch"]),
        ("test", vec!["compile"]),
        ("lint", vec!["compile"]),
        ("package", vec!["test", "lint", "docs"]),
    ];
    let tasks: Vec<TaskDefinition> = graph
        .iter()
        .map(|(id, deps)| {
            sleeping_task(id, Duration::from_millis(15)).with_dependencies(deps.iter().copied())
        })
        .collect();

    let log = SnapshotLog::new();
    let summary = run_task_graph(tasks, fast_options().on_state_change(log.callback()))
        .await
        .unwrap();
    assert_eq!(summary.success_count, graph.len());

    let snapshots = log.snapshots();
    assert!(!snapshots.is_empty());
    for snapshot in snapshots.iter().chain([&summary.state]) {
        for (id, deps) in &graph {
            let task = snapshot.get(&TaskId::new(*id)).unwrap();
            if task.status == TaskStatus::Pending {
                continue;
            }
            for dep in deps {
                let dep_state = snapshot.get(&TaskId::new(*dep)).unwrap();
                assert_eq!(
                    dep_state.status,
                    TaskStatus::Succeeded,
                    "{id} was {} while {dep} was {}",
                    task.status,
                    dep_state.status
                );
            }
        }
    }
}

/// Test: ten independent tasks with concurrency 3 never exceed 3 running.
#[tokio::test]
async fn test_concurrency_ceiling() {
    let probe = ConcurrencyProbe::new();
    let tasks: Vec<TaskDefinition> = (0..10)
        .map(|i| probe.task(format!("task_{i}"), Duration::from_millis(30)))
        .collect();

    let log = SnapshotLog::new();
    let options = fast_options()
        .concurrency(3)
        .on_state_change(log.callback());
    let summary = run_task_graph(tasks, options).await.unwrap();

    assert_eq!(summary.success_count, 10);
    assert!(probe.max_observed() <= 3, "probe saw {}", probe.max_observed());
    assert!(probe.max_observed() >= 2);
    assert!(log.max_running() <= 3, "snapshot saw {}", log.max_running());
}

/// Test: retries are invisible to dependents and follow the backoff.
#[tokio::test]
async fn test_retry_transparency() {
    let flaky = Arc::new(FlakyComputation::new(2));
    let backoff = Duration::from_millis(20);
    let policy = RetryPolicy::exponential(2, backoff);
    let task = TaskDefinition::compute("flaky", flaky.clone()).with_retry(policy);

    let (sender, mut rx) = EventSender::channel();
    let executor = TaskExecutor::new(1);
    let start = Instant::now();
    let result = executor.execute(&task, &sender).await;
    let elapsed = start.elapsed();
    drop(sender);

    assert!(result.is_success());
    assert_eq!(result.attempts, 3);
    assert_eq!(flaky.calls(), 3);
    assert!(elapsed >= policy.total_backoff());

    let mut retry_attempts = Vec::new();
    let mut completed = Vec::new();
    while let Some(event) = rx.recv().await {
        match event {
            TaskEvent::Retrying {
                attempt,
                max_attempts,
                ..
            } => {
                assert_eq!(max_attempts, 3);
                retry_attempts.push(attempt);
            }
            TaskEvent::Completed { outcome, .. } => completed.push(outcome),
            _ => {}
        }
    }
    assert_eq!(retry_attempts, vec![1, 2]);
    assert_eq!(completed.len(), 1);
    assert!(completed[0].is_success());
}

/// Test: a dependent of a retried task runs once the retries succeed.
#[tokio::test]
async fn test_dependent_waits_for_retried_task() {
    let flaky = Arc::new(FlakyComputation::new(1));
    let tasks = vec![
        TaskDefinition::compute("flaky", flaky)
            .with_retry(RetryPolicy::exponential(1, Duration::from_millis(5))),
        ok_task("next").depends_on("flaky"),
    ];

    let summary = run_task_graph(tasks, fast_options()).await.unwrap();

    assert!(summary.is_success());
    let flaky_state = summary.state.get(&TaskId::new("flaky")).unwrap();
    assert_eq!(flaky_state.retry_attempt, 1);
    assert_eq!(flaky_state.stdout, vec!["attempt 1", "attempt 2"]);
}

/// Test: a cycle is rejected before any task runs.
#[tokio::test]
async fn test_cycle_rejected_without_running() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counting = |id: &str| {
        let calls = Arc::clone(&calls);
        TaskDefinition::compute_fn(id, move |_log| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(serde_json::Value::Null)
            }
        })
    };
    let tasks = vec![
        counting("a").depends_on("b"),
        counting("b").depends_on("a"),
        counting("free"),
    ];

    let err = run_task_graph(tasks, fast_options()).await.unwrap_err();

    match err {
        RunError::Graph(GraphError::CircularDependency { involved }) => {
            assert!(involved.contains(&TaskId::new("a")));
            assert!(involved.contains(&TaskId::new("b")));
        }
        other => panic!("expected CircularDependency, got {:?}", other),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

/// Test: an unknown dependency is rejected with both ids.
#[tokio::test]
async fn test_unknown_dependency_rejected() {
    let tasks = vec![ok_task("build").depends_on("fetch")];

    let err = run_task_graph(tasks, fast_options()).await.unwrap_err();

    match err {
        RunError::Graph(GraphError::UnknownDependency {
            dependency_id,
            task_id,
        }) => {
            assert_eq!(dependency_id, TaskId::new("fetch"));
            assert_eq!(task_id, TaskId::new("build"));
        }
        other => panic!("expected UnknownDependency, got {:?}", other),
    }
}

/// Test: strict mode lists every failed task after the run settles.
#[tokio::test]
async fn test_strict_mode_lists_failed_tasks() {
    let tasks = vec![
        failing_task("x"),
        failing_task("y"),
        sleeping_task("z", Duration::from_millis(10)),
    ];

    let err = run_task_graph_or_fail(tasks, fast_options())
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "2 task(s) failed: x, y");
}

/// Test: an empty task set completes immediately.
#[tokio::test]
async fn test_empty_task_set() {
    let summary = run_task_graph(Vec::new(), fast_options()).await.unwrap();

    assert!(summary.state.is_empty());
    assert_eq!(summary.success_count, 0);
    assert_eq!(summary.failure_count, 0);
}

/// Test: subscribers see the final state once the run ends.
#[tokio::test]
async fn test_subscription_sees_final_state() {
    let options = fast_options();
    let mut snapshots = options.subscribe();

    let summary = run_task_graph(vec![ok_task("a"), ok_task("b").depends_on("a")], options)
        .await
        .unwrap();

    let last = snapshots.borrow_and_update().clone();
    assert_eq!(*last, summary.state);
    assert!(snapshots.changed().await.is_err());
}
