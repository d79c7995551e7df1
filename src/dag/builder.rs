// src/dag/builder.rs

//! Turns build requests into task graphs.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::dag::graph::TaskGraph;
use crate::dag::task::{BuildOptions, Task};
use crate::errors::{CoordError, Result};
use crate::store::{ConfigurationSet, ConfigurationSnapshot, Datastore};
use crate::types::{ConfigId, User};

/// Creates tasks for a request and wires their dependency edges.
///
/// Every task builds the *latest snapshot* of its configuration as of graph
/// construction. Edges are only created between members of the same request:
/// a dependency on a configuration outside the request is assumed to be
/// satisfied already and does not appear in the graph.
pub struct TaskGraphBuilder<'a> {
    datastore: &'a dyn Datastore,
    detect_cycles: bool,
}

impl<'a> TaskGraphBuilder<'a> {
    pub fn new(datastore: &'a dyn Datastore) -> Self {
        Self {
            datastore,
            detect_cycles: true,
        }
    }

    pub fn detect_cycles(mut self, on: bool) -> Self {
        self.detect_cycles = on;
        self
    }

    /// Build a lone task for one configuration. No edges are created.
    pub fn build_single(&self, config: &ConfigId, user: &User, options: &BuildOptions) -> Result<Task> {
        let snapshot = self.resolve(config)?;
        let id = self.datastore.next_task_id();
        debug!(task = %id, key = %snapshot.key(), "created single task");
        Ok(Task::new(id, snapshot, user.clone(), options.clone()))
    }

    /// Build the full graph for a configuration set.
    ///
    /// All snapshots are resolved before any task is created, so a failing
    /// lookup leaves nothing behind.
    pub fn build_graph(
        &self,
        set: &ConfigurationSet,
        user: &User,
        options: &BuildOptions,
    ) -> Result<TaskGraph> {
        let mut seen = HashSet::new();
        let members: Vec<&ConfigId> = set
            .members
            .iter()
            .filter(|c| seen.insert((*c).clone()))
            .collect();

        if members.is_empty() {
            return Err(CoordError::GraphConstruction(format!(
                "configuration set '{}' has no members",
                set.id
            )));
        }
        if members.len() != set.members.len() {
            warn!(set = %set.id, "configuration set lists duplicate members; building each once");
        }

        let snapshots = members
            .into_iter()
            .map(|c| self.resolve(c))
            .collect::<Result<Vec<_>>>()?;

        let mut graph = TaskGraph::new();
        for snapshot in snapshots {
            let id = self.datastore.next_task_id();
            graph.insert(Task::new(id, snapshot, user.clone(), options.clone()));
        }

        // Second pass: edges restricted to members of this request.
        let ids: Vec<_> = graph.ids().collect();
        for id in ids {
            let deps: Vec<ConfigId> = match graph.get(id) {
                Some(task) => task.snapshot().dependencies.iter().cloned().collect(),
                None => continue,
            };
            for dep in deps {
                match graph.task_for(&dep) {
                    Some(dep_id) => graph.add_dependency(id, dep_id)?,
                    None => debug!(
                        task = %id,
                        dependency = %dep,
                        "dependency outside the requested set; treating as satisfied"
                    ),
                }
            }
        }

        if self.detect_cycles {
            graph.ensure_acyclic()?;
        }

        debug!(set = %set.id, tasks = graph.len(), "built task graph");
        Ok(graph)
    }

    fn resolve(&self, config: &ConfigId) -> Result<ConfigurationSnapshot> {
        self.datastore.latest_snapshot(config).map_err(|e| {
            CoordError::GraphConstruction(format!(
                "resolving latest snapshot of '{config}': {e:#}"
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryDatastore;
    use crate::types::Revision;

    fn store() -> MemoryDatastore {
        let store = MemoryDatastore::new();
        store.add_configuration("a", "make a", []);
        store.add_configuration("b", "make b", []);
        store.add_configuration("c", "make c", ["a".into(), "b".into()]);
        store.add_configuration("d", "make d", ["outside".into()]);
        store
    }

    fn set(members: &[&str]) -> ConfigurationSet {
        ConfigurationSet::new("test", members.iter().map(|m| ConfigId::new(*m)))
    }

    #[test]
    fn wires_edges_between_requested_members() {
        let store = store();
        let builder = TaskGraphBuilder::new(&store);
        let graph = builder
            .build_graph(&set(&["a", "b", "c"]), &User::new("ci"), &BuildOptions::default())
            .unwrap();

        let c = graph.task_for(&"c".into()).unwrap();
        let a = graph.task_for(&"a".into()).unwrap();
        let b = graph.task_for(&"b".into()).unwrap();
        let deps = graph.get(c).unwrap().dependencies();
        assert!(deps.contains(&a) && deps.contains(&b));
        assert_eq!(graph.roots().len(), 2);
    }

    #[test]
    fn dependencies_outside_the_set_create_no_edges() {
        let store = store();
        let graph = TaskGraphBuilder::new(&store)
            .build_graph(&set(&["c", "d"]), &User::new("ci"), &BuildOptions::default())
            .unwrap();

        for id in graph.ids() {
            assert!(graph.get(id).unwrap().dependencies().is_empty());
        }
    }

    #[test]
    fn uses_latest_revision_and_copies_options() {
        let store = store();
        store.add_configuration("a", "make a v2", []);
        let options = BuildOptions::rebuild_all().with_record_set("nightly");

        let graph = TaskGraphBuilder::new(&store)
            .build_graph(&set(&["a"]), &User::new("ci"), &options)
            .unwrap();

        let task = graph.get(graph.task_for(&"a".into()).unwrap()).unwrap();
        assert_eq!(task.key().revision, Revision(2));
        assert!(task.rebuild_all());
        assert!(task.record_sets().contains("nightly"));
    }

    #[test]
    fn snapshot_failure_fails_the_whole_request() {
        let store = store();
        store.break_configuration("b");

        let res = TaskGraphBuilder::new(&store).build_graph(
            &set(&["a", "b", "c"]),
            &User::new("ci"),
            &BuildOptions::default(),
        );
        match res {
            Err(CoordError::GraphConstruction(msg)) => assert!(msg.contains("'b'")),
            other => panic!("expected GraphConstruction, got {other:?}"),
        }
    }

    #[test]
    fn empty_and_duplicate_members() {
        let store = store();
        let builder = TaskGraphBuilder::new(&store);
        assert!(builder
            .build_graph(&set(&[]), &User::new("ci"), &BuildOptions::default())
            .is_err());

        let graph = builder
            .build_graph(&set(&["a", "a"]), &User::new("ci"), &BuildOptions::default())
            .unwrap();
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn cycle_detection_can_be_disabled() {
        let store = MemoryDatastore::new();
        store.add_configuration("x", "make x", ["y".into()]);
        store.add_configuration("y", "make y", ["x".into()]);
        let s = set(&["x", "y"]);

        assert!(TaskGraphBuilder::new(&store)
            .build_graph(&s, &User::new("ci"), &BuildOptions::default())
            .is_err());
        assert!(TaskGraphBuilder::new(&store)
            .detect_cycles(false)
            .build_graph(&s, &User::new("ci"), &BuildOptions::default())
            .is_ok());
    }
}
