// src/dag/mod.rs

//! Tasks, their dependency graph, and build-set aggregation.
//!
//! - [`status`] holds the task state machine and the build-set status.
//! - [`task`] is a single build of one configuration revision.
//! - [`graph`] is the arena that wires dependency edges by task id.
//! - [`builder`] turns a build request into a [`TaskGraph`].
//! - [`task_set`] aggregates member statuses of a build set.

pub mod builder;
pub mod graph;
pub mod status;
pub mod task;
pub mod task_set;

pub use builder::TaskGraphBuilder;
pub use graph::TaskGraph;
pub use status::{FinalStatus, TaskSetStatus, TaskStatus};
pub use task::{BuildOptions, Task, TaskState, Transition};
pub use task_set::TaskSet;
