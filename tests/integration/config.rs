//! Task file integration tests.
//!
//! Tests that verify the full pipeline from YAML to execution.

use dagrun::{
    ConfigError, GraphError, RunError, TaskGraph, TaskId, TaskSetBuilder, TaskStatus, YamlLoader,
    run_task_graph,
};
use std::time::Duration;

const PIPELINE: &str = r#"
concurrency: 2
publish_interval_ms: 5
tasks:
  - id: fetch
    command: sh
    args: ["-c", "echo fetched"]
  - id: build
    name: Build
    command: sh
    args: ["-c", "echo \"building in $MODE\""]
    environment:
      MODE: release
    depends_on: [fetch]
  - id: test
    command: sh
    args: ["-c", "exit 3"]
    depends_on: [build]
    retry:
      max_retries: 1
      backoff_ms: 5
  - id: publish
    command: sh
    args: ["-c", "echo published"]
    depends_on: [test]
"#;

/// Test: a task file runs end to end.
#[tokio::test]
async fn test_yaml_pipeline_runs() {
    let config = YamlLoader::parse_str(PIPELINE).unwrap();
    let options = TaskSetBuilder::run_options(&config);
    assert_eq!(options.get_concurrency(), 2);

    let summary = run_task_graph(TaskSetBuilder::build(&config), options)
        .await
        .unwrap();

    let state = &summary.state;
    let fetch = state.get(&TaskId::new("fetch")).unwrap();
    assert_eq!(fetch.status, TaskStatus::Succeeded);
    assert_eq!(fetch.stdout, vec!["fetched"]);

    let build = state.get(&TaskId::new("build")).unwrap();
    assert_eq!(build.name, "Build");
    assert_eq!(build.stdout, vec!["building in release"]);

    let test = state.get(&TaskId::new("test")).unwrap();
    assert_eq!(test.status, TaskStatus::Failed);
    assert_eq!(test.retry_attempt, 1);
    assert_eq!(test.command_info.as_ref().unwrap().exit_code, 3);

    let publish = state.get(&TaskId::new("publish")).unwrap();
    assert_eq!(publish.status, TaskStatus::Pending);
    assert_eq!(publish.blocked_by, Some(TaskId::new("test")));

    assert_eq!(summary.success_count, 2);
    assert_eq!(summary.failed_task_ids, vec![TaskId::new("test")]);
}

/// Test: a task file with a log file writes it next to the run.
#[tokio::test]
async fn test_yaml_log_file() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("out").join("hello.log");
    let yaml = format!(
        "tasks:\n  - id: hello\n    command: echo\n    args: [hi]\n    log_file: {}\n",
        log_path.display()
    );
    let path = dir.path().join("tasks.yaml");
    std::fs::write(&path, yaml).unwrap();

    let (config, tasks) = TaskSetBuilder::load(&path).unwrap();
    let options = TaskSetBuilder::run_options(&config).publish_interval(Duration::from_millis(1));
    let summary = run_task_graph(tasks, options).await.unwrap();

    assert!(summary.is_success());
    let contents = std::fs::read_to_string(&log_path).unwrap();
    assert!(contents.contains("# Status: succeeded"));
    assert!(contents.contains("--- stdout ---\nhi\n"));
}

/// Test: cycles in a task file are reported by the graph builder.
#[test]
fn test_yaml_cycle_reported_by_graph() {
    let yaml = r#"
tasks:
  - id: a
    command: "true"
    depends_on: [c]
  - id: b
    command: "true"
    depends_on: [a]
  - id: c
    command: "true"
    depends_on: [b]
"#;
    let config = YamlLoader::parse_str(yaml).unwrap();
    let err = TaskGraph::build(TaskSetBuilder::build(&config)).unwrap_err();

    match err {
        GraphError::CircularDependency { involved } => assert_eq!(involved.len(), 3),
        other => panic!("expected CircularDependency, got {:?}", other),
    }
}

/// Test: an unknown dependency in a task file fails the run before it starts.
#[tokio::test]
async fn test_yaml_unknown_dependency_fails_run() {
    let yaml = r#"
tasks:
  - id: deploy
    command: "true"
    depends_on: [build]
"#;
    let config = YamlLoader::parse_str(yaml).unwrap();
    let err = run_task_graph(TaskSetBuilder::build(&config), TaskSetBuilder::run_options(&config))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RunError::Graph(GraphError::UnknownDependency { .. })
    ));
}

/// Test: loader errors carry the offending file path.
#[test]
fn test_missing_task_file() {
    let err = TaskSetBuilder::load("/nonexistent/dagrun/tasks.yaml").unwrap_err();

    assert!(matches!(err, ConfigError::FileReadError { .. }));
    assert!(err.to_string().contains("/nonexistent/dagrun/tasks.yaml"));
}
