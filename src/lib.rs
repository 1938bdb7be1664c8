//! Dependency-graph task runner.
//!
//! Tasks declare dependencies on each other and run as soon as those
//! dependencies succeed, bounded by a concurrency limit. Progress is reported
//! as events, folded into a [`SystemState`] by a single coordinator and
//! published as snapshots.

pub mod config;
pub mod core;
pub mod events;
pub mod execution;
pub mod render;
pub mod runner;
pub mod state;
pub mod testing;

pub use config::{ConfigError, TaskFileConfig, TaskSetBuilder, YamlLoader};
pub use core::dag::{GraphError, TaskGraph};
pub use core::environment::Environment;
pub use core::retry::RetryPolicy;
pub use core::task::{
    CommandFailure, Computation, FnComputation, TaskDefinition, TaskError, TaskWork,
};
pub use core::types::{RunId, TaskId};
pub use events::{EventSender, TaskEmitter, TaskEvent, TaskLogger, TaskOutcome};
pub use execution::{
    CommandSpec, CommandSpecBuilder, DagExecutor, DagResult, Interrupt, NodeOutcome,
    TaskExecutor, TaskResult,
};
pub use render::{Renderer, TracingRenderer};
pub use runner::{RunError, RunOptions, RunSummary, run_task_graph, run_task_graph_or_fail};
pub use state::{CommandInfo, OutputLines, StateReceiver, SystemState, TaskState, TaskStatus, reduce};
