//! Configuration loading and parsing.
//!
//! Task files are YAML documents listing command tasks and their
//! dependencies. [`YamlLoader`] parses and validates them and
//! [`TaskSetBuilder`] turns them into runnable task definitions.

mod builder;
mod error;
mod types;
mod yaml;

pub use builder::TaskSetBuilder;
pub use error::ConfigError;
pub use types::{RetryConfig, TaskConfig, TaskFileConfig};
pub use yaml::YamlLoader;
