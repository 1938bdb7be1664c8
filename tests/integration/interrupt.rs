//! Interrupt integration tests.
//!
//! Tests that verify a run stops promptly and leaves consistent state.

use crate::common::ok_task;
use dagrun::testing::shell_task;
use dagrun::{Interrupt, RunOptions, TaskId, TaskStatus, run_task_graph};
use std::time::{Duration, Instant};

/// Test: interrupting kills running commands and leaves waiting tasks pending.
#[tokio::test]
async fn test_interrupt_stops_running_commands() {
    let interrupt = Interrupt::new();
    let options = RunOptions::new()
        .publish_interval(Duration::from_millis(1))
        .interrupt(interrupt.clone());

    let tasks = vec![
        ok_task("quick"),
        shell_task("slow", "exec sleep 30").depends_on("quick"),
        ok_task("after").depends_on("slow"),
    ];

    let mut snapshots = options.subscribe();
    let trigger = tokio::spawn(async move {
        // Wait until the slow command is running before interrupting
        let _ = snapshots
            .wait_for(|state| {
                state
                    .get(&TaskId::new("slow"))
                    .is_some_and(|task| task.status == TaskStatus::Running)
            })
            .await;
        interrupt.trigger();
    });

    let start = Instant::now();
    let summary = run_task_graph(tasks, options).await.unwrap();
    trigger.await.unwrap();

    assert!(start.elapsed() < Duration::from_secs(10));
    assert!(summary.interrupted);

    let quick = summary.state.get(&TaskId::new("quick")).unwrap();
    assert_eq!(quick.status, TaskStatus::Succeeded);

    let slow = summary.state.get(&TaskId::new("slow")).unwrap();
    assert_eq!(slow.status, TaskStatus::Failed);
    assert_eq!(slow.error.as_deref(), Some("interrupted"));

    let after = summary.state.get(&TaskId::new("after")).unwrap();
    assert_eq!(after.status, TaskStatus::Pending);
    assert!(!after.is_blocked());
    assert!(summary.blocked_task_ids.is_empty());
}

/// Test: an interrupt stops a command whose background child still holds its output pipes.
#[tokio::test]
async fn test_interrupt_with_background_child_holding_pipes() {
    let interrupt = Interrupt::new();
    let options = RunOptions::new()
        .publish_interval(Duration::from_millis(1))
        .interrupt(interrupt.clone());

    let tasks = vec![
        shell_task("bg", "sleep 30 & echo bg"),
        ok_task("after").depends_on("bg"),
    ];

    let trigger = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        interrupt.trigger();
    });

    let start = Instant::now();
    let summary = tokio::time::timeout(Duration::from_secs(5), run_task_graph(tasks, options))
        .await
        .expect("run did not stop after the interrupt")
        .unwrap();
    trigger.await.unwrap();

    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(summary.interrupted);

    let bg = summary.state.get(&TaskId::new("bg")).unwrap();
    assert_eq!(bg.status, TaskStatus::Failed);
    assert_eq!(bg.error.as_deref(), Some("interrupted"));
    assert_eq!(bg.stdout, vec!["bg"]);

    let after = summary.state.get(&TaskId::new("after")).unwrap();
    assert_eq!(after.status, TaskStatus::Pending);
    assert!(!after.is_blocked());
}

/// Test: an interrupt triggered before the run starts runs nothing.
#[tokio::test]
async fn test_interrupt_before_start() {
    let interrupt = Interrupt::new();
    interrupt.trigger();

    let options = RunOptions::new().interrupt(interrupt);
    let summary = run_task_graph(vec![ok_task("a"), ok_task("b").depends_on("a")], options)
        .await
        .unwrap();

    assert!(summary.interrupted);
    assert_eq!(summary.success_count, 0);
    assert_eq!(summary.failure_count, 0);
    assert!(
        summary
            .state
            .iter()
            .all(|task| task.status == TaskStatus::Pending)
    );
}
