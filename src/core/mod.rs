//! Core domain types: task definitions, retry policies and the task graph.

pub mod dag;
pub mod environment;
pub mod retry;
pub mod task;
pub mod types;
