//! Task execution engine.
//!
//! This module provides the execution infrastructure for running tasks:
//! spawning external commands, the per-task retry loop and the
//! dependency-gated scheduler.

mod command;
mod dag_executor;
mod executor;
mod interrupt;

pub use command::{CommandSpec, CommandSpecBuilder, run_command};
pub use dag_executor::{DagExecutor, DagResult, NodeOutcome};
pub use executor::{TaskExecutor, TaskResult};
pub use interrupt::Interrupt;
