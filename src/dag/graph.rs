// src/dag/graph.rs

use std::collections::{BTreeMap, HashMap};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::dag::task::Task;
use crate::errors::{CoordError, Result};
use crate::types::{ConfigId, TaskId, TaskSetId};

/// Arena of tasks under construction, keyed by id.
///
/// Edges are stored on the tasks themselves as id sets; this type only makes
/// sure both directions are always written together. Once the graph is
/// complete it is frozen with [`TaskGraph::into_tasks`] and handed to the
/// engine.
#[derive(Debug, Default)]
pub struct TaskGraph {
    tasks: BTreeMap<TaskId, Task>,
    by_config: HashMap<ConfigId, TaskId>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, task: Task) -> TaskId {
        let id = task.id();
        self.by_config.insert(task.key().config.clone(), id);
        self.tasks.insert(id, task);
        id
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    /// The task building `config` in this graph, if any.
    pub fn task_for(&self, config: &ConfigId) -> Option<TaskId> {
        self.by_config.get(config).copied()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.tasks.keys().copied()
    }

    /// Tasks with no dependency edge inside this graph.
    pub fn roots(&self) -> Vec<TaskId> {
        self.tasks
            .values()
            .filter(|t| t.dependencies().is_empty())
            .map(|t| t.id())
            .collect()
    }

    /// Record that `dependent` must wait for `dependency`, in both directions.
    pub fn add_dependency(&mut self, dependent: TaskId, dependency: TaskId) -> Result<()> {
        if dependent == dependency {
            return Err(CoordError::GraphConstruction(format!(
                "{dependent} cannot depend on itself"
            )));
        }
        if !self.tasks.contains_key(&dependency) {
            return Err(CoordError::GraphConstruction(format!(
                "dependency {dependency} is not part of this graph"
            )));
        }

        match self.tasks.get_mut(&dependent) {
            Some(task) => task.add_dependency_id(dependency),
            None => {
                return Err(CoordError::GraphConstruction(format!(
                    "dependent {dependent} is not part of this graph"
                )));
            }
        }
        if let Some(task) = self.tasks.get_mut(&dependency) {
            task.add_dependent_id(dependent);
        }
        Ok(())
    }

    /// Fail if the dependency edges contain a cycle.
    pub fn ensure_acyclic(&self) -> Result<()> {
        // Edge direction: dependency -> dependent.
        let mut graph: DiGraphMap<TaskId, ()> = DiGraphMap::new();
        for id in self.tasks.keys() {
            graph.add_node(*id);
        }
        for task in self.tasks.values() {
            for dep in task.dependencies() {
                graph.add_edge(*dep, task.id(), ());
            }
        }

        match toposort(&graph, None) {
            Ok(_order) => Ok(()),
            Err(cycle) => {
                let node = cycle.node_id();
                let config = self
                    .tasks
                    .get(&node)
                    .map(|t| t.key().config.to_string())
                    .unwrap_or_else(|| node.to_string());
                Err(CoordError::GraphConstruction(format!(
                    "dependency cycle involving configuration '{config}'"
                )))
            }
        }
    }

    pub fn assign_task_set(&mut self, set: TaskSetId) {
        for task in self.tasks.values_mut() {
            task.set_task_set(set);
        }
    }

    pub fn into_tasks(self) -> Vec<Task> {
        self.tasks.into_values().collect()
    }
}
