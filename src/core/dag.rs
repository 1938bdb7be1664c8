//! Dependency graph construction and validation.
//!
//! A [`TaskGraph`] is built once from a list of task definitions. Edges point
//! from a dependency to its dependents. Building fails if a dependency id is
//! unknown, an id is declared twice, or the graph contains a cycle; nothing is
//! executed here.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use thiserror::Error;

use super::task::TaskDefinition;
use super::types::TaskId;

/// Errors that can occur when building a task graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// A task declares a dependency that is not part of the task set.
    #[error("unknown dependency: task '{task_id}' depends on non-existent task '{dependency_id}'")]
    UnknownDependency {
        dependency_id: TaskId,
        task_id: TaskId,
    },

    /// The dependency graph contains at least one cycle.
    #[error("circular dependency detected involving: {}", display_ids(.involved))]
    CircularDependency { involved: Vec<TaskId> },

    /// Two task definitions share the same id.
    #[error("duplicate task: {0}")]
    DuplicateTask(TaskId),
}

fn display_ids(ids: &[TaskId]) -> String {
    ids.iter()
        .map(TaskId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// A validated, read-only directed acyclic graph of tasks.
///
/// Cloning is cheap; definitions are shared.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    /// Task definitions indexed by id.
    nodes: HashMap<TaskId, Arc<TaskDefinition>>,

    /// Edges: task_id -> tasks that depend on it.
    dependents: HashMap<TaskId, Vec<TaskId>>,

    /// Ids in a valid execution order (dependencies first).
    order: Vec<TaskId>,
}

impl TaskGraph {
    /// Build and validate a graph from task definitions.
    ///
    /// Stops at the first unknown dependency. Cycle detection runs over the
    /// whole graph once every edge is in place.
    pub fn build(tasks: impl IntoIterator<Item = TaskDefinition>) -> Result<Self, GraphError> {
        let mut nodes: HashMap<TaskId, Arc<TaskDefinition>> = HashMap::new();
        let mut declared: Vec<TaskId> = Vec::new();

        for task in tasks {
            let id = task.id().clone();
            if nodes.contains_key(&id) {
                return Err(GraphError::DuplicateTask(id));
            }
            declared.push(id.clone());
            nodes.insert(id, Arc::new(task));
        }

        let mut dependents: HashMap<TaskId, Vec<TaskId>> =
            declared.iter().map(|id| (id.clone(), Vec::new())).collect();

        for id in &declared {
            let task = &nodes[id];
            for dep in task.dependencies() {
                match dependents.get_mut(dep) {
                    Some(downstream) => downstream.push(id.clone()),
                    None => {
                        return Err(GraphError::UnknownDependency {
                            dependency_id: dep.clone(),
                            task_id: id.clone(),
                        });
                    }
                }
            }
        }

        let order = topological_order(&declared, &nodes, &dependents)?;

        Ok(Self {
            nodes,
            dependents,
            order,
        })
    }

    /// Check if the graph is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Get the number of tasks in the graph.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Get a task definition by id.
    pub fn task(&self, id: &TaskId) -> Option<&Arc<TaskDefinition>> {
        self.nodes.get(id)
    }

    /// Direct dependencies of a task.
    pub fn dependencies_of(&self, id: &TaskId) -> &[TaskId] {
        self.nodes
            .get(id)
            .map(|task| task.dependencies())
            .unwrap_or(&[])
    }

    /// Tasks that directly depend on the given task.
    pub fn dependents_of(&self, id: &TaskId) -> &[TaskId] {
        self.dependents
            .get(id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Tasks with no dependencies.
    pub fn roots(&self) -> impl Iterator<Item = &TaskId> {
        self.order
            .iter()
            .filter(|id| self.dependencies_of(id).is_empty())
    }

    /// Task ids in topological order: every task appears after its dependencies.
    pub fn topological_order(&self) -> &[TaskId] {
        &self.order
    }

    /// Task definitions in topological order.
    pub fn tasks(&self) -> impl Iterator<Item = &Arc<TaskDefinition>> {
        self.order.iter().map(|id| &self.nodes[id])
    }
}

/// Kahn's algorithm over the declared ids.
///
/// Ties are broken by declaration order so the result is deterministic.
fn topological_order(
    declared: &[TaskId],
    nodes: &HashMap<TaskId, Arc<TaskDefinition>>,
    dependents: &HashMap<TaskId, Vec<TaskId>>,
) -> Result<Vec<TaskId>, GraphError> {
    let mut in_degree: HashMap<&TaskId, usize> = declared
        .iter()
        .map(|id| (id, nodes[id].dependencies().len()))
        .collect();

    let mut queue: VecDeque<&TaskId> = declared
        .iter()
        .filter(|id| in_degree[id] == 0)
        .collect();

    let mut order = Vec::with_capacity(declared.len());

    while let Some(id) = queue.pop_front() {
        order.push(id.clone());

        for next in &dependents[id] {
            if let Some(degree) = in_degree.get_mut(next) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(next);
                }
            }
        }
    }

    if order.len() != declared.len() {
        let involved = declared
            .iter()
            .filter(|id| in_degree[id] > 0)
            .cloned()
            .collect();
        return Err(GraphError::CircularDependency { involved });
    }

    Ok(order)
}
