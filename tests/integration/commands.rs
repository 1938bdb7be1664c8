//! Command task integration tests.
//!
//! Tests that run real `sh` processes through the scheduler.

use crate::common::ok_task;
use dagrun::testing::shell_task;
use dagrun::{CommandSpec, RetryPolicy, RunOptions, TaskDefinition, TaskId, TaskStatus, run_task_graph};
use std::time::Duration;

fn fast_options() -> RunOptions {
    RunOptions::new().publish_interval(Duration::from_millis(1))
}

/// Test: `sh -c "exit 1"` without retries fails with exit code 1.
#[tokio::test]
async fn test_command_exit_code_recorded() {
    let summary = run_task_graph(vec![shell_task("exit1", "exit 1")], fast_options())
        .await
        .unwrap();

    let task = summary.state.get(&TaskId::new("exit1")).unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retry_attempt, 0);

    let info = task.command_info.as_ref().unwrap();
    assert_eq!(info.exit_code, 1);
    assert_eq!(info.command, "sh");
    assert_eq!(info.args, vec!["-c", "exit 1"]);
    assert!(task.error.as_deref().unwrap().contains("exited with code 1"));
}

/// Test: stdout and stderr lines land in the task state in order.
#[tokio::test]
async fn test_command_output_streamed_into_state() {
    let task = shell_task("talk", "echo one; echo two; echo oops >&2; echo three");

    let summary = run_task_graph(vec![task], fast_options()).await.unwrap();

    let state = summary.state.get(&TaskId::new("talk")).unwrap();
    assert_eq!(state.status, TaskStatus::Succeeded);
    assert_eq!(state.stdout, vec!["one", "two", "three"]);
    assert_eq!(state.stderr, vec!["oops"]);
    assert_eq!(state.result, Some(serde_json::Value::Null));
}

/// Test: a failing command blocks its dependents.
#[tokio::test]
async fn test_failed_command_blocks_dependents() {
    let tasks = vec![
        shell_task("setup", "exit 7"),
        ok_task("deploy").depends_on("setup"),
    ];

    let summary = run_task_graph(tasks, fast_options()).await.unwrap();

    let setup = summary.state.get(&TaskId::new("setup")).unwrap();
    assert_eq!(setup.command_info.as_ref().unwrap().exit_code, 7);

    let deploy = summary.state.get(&TaskId::new("deploy")).unwrap();
    assert_eq!(deploy.status, TaskStatus::Pending);
    assert_eq!(deploy.blocked_by, Some(TaskId::new("setup")));
}

/// Test: a command that fails once is retried and succeeds.
#[tokio::test]
async fn test_command_retry_until_success() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("marker");
    let script = format!(
        "if [ -f {0} ]; then echo second; else touch {0}; echo first; exit 2; fi",
        marker.display()
    );
    let task = shell_task("once", &script)
        .with_retry(RetryPolicy::exponential(2, Duration::from_millis(5)));

    let summary = run_task_graph(vec![task], fast_options()).await.unwrap();

    let state = summary.state.get(&TaskId::new("once")).unwrap();
    assert_eq!(state.status, TaskStatus::Succeeded);
    assert_eq!(state.retry_attempt, 1);
    assert_eq!(state.max_retries, 2);
    assert_eq!(state.stdout, vec!["first", "second"]);
    assert!(state.command_info.is_none());
}

/// Test: environment and working directory reach the process.
#[tokio::test]
async fn test_command_environment_and_working_dir() {
    let dir = tempfile::tempdir().unwrap();
    let spec = CommandSpec::builder("sh")
        .args(["-c", "echo \"$GREETING\"; pwd"])
        .env("GREETING", "hello")
        .working_dir(dir.path())
        .build();

    let summary = run_task_graph(vec![TaskDefinition::command("env", spec)], fast_options())
        .await
        .unwrap();

    let state = summary.state.get(&TaskId::new("env")).unwrap();
    assert_eq!(state.stdout[0], "hello");
    let reported = std::fs::canonicalize(&state.stdout[1]).unwrap();
    assert_eq!(reported, std::fs::canonicalize(dir.path()).unwrap());
}

/// Test: a missing program fails the task without a command exit code.
#[tokio::test]
async fn test_missing_program_fails_task() {
    let spec = CommandSpec::new("dagrun-definitely-not-a-program");

    let summary = run_task_graph(vec![TaskDefinition::command("ghost", spec)], fast_options())
        .await
        .unwrap();

    let state = summary.state.get(&TaskId::new("ghost")).unwrap();
    assert_eq!(state.status, TaskStatus::Failed);
    assert!(state.command_info.is_none());
    assert!(state.error.as_deref().unwrap().contains("failed to spawn"));
}

/// Test: the log file holds a header and the final attempt's output.
#[tokio::test]
async fn test_log_file_written() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("logs").join("build.log");
    let task = shell_task("build", "echo compiling; echo warning >&2; exit 4")
        .with_log_file(&log_path);

    let summary = run_task_graph(vec![task], fast_options()).await.unwrap();
    assert_eq!(summary.failure_count, 1);

    let contents = std::fs::read_to_string(&log_path).unwrap();
    assert!(contents.starts_with("# Task: build\n"));
    assert!(contents.contains("# Status: failed\n"));
    assert!(contents.contains("# Duration: "));
    assert!(contents.contains("# Started: "));
    assert!(contents.contains(&format!("# Run: {}\n", summary.run_id)));
    assert!(contents.contains("--- stdout ---\ncompiling\n"));
    assert!(contents.contains("--- stderr ---\nwarning\n"));
}

/// Test: an unwritable log file does not change the task outcome.
#[tokio::test]
async fn test_log_file_failure_does_not_fail_task() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not_a_dir");
    std::fs::write(&blocker, "file").unwrap();
    let task = shell_task("quiet", "echo fine").with_log_file(blocker.join("task.log"));

    let summary = run_task_graph(vec![task], fast_options()).await.unwrap();

    assert!(summary.is_success());
}
