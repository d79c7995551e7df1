// src/exec/backend.rs

//! Pluggable build scheduler abstraction.
//!
//! The engine never runs builds itself. It hands each ready task to a
//! [`BuildScheduler`] together with a [`BuildReporter`] the scheduler uses to
//! report progress and the final outcome.
//!
//! - `ProcessScheduler` is the default implementation used by `buildcoord`.
//!   It runs the configuration's script as a local process.
//! - Tests provide their own `BuildScheduler` that records which tasks were
//!   started and completes them on demand.

use std::collections::BTreeSet;

use anyhow::Result;

use crate::dag::Task;
use crate::engine::BuildReporter;
use crate::types::{LogicalKey, TaskId, User};

/// Everything a scheduler needs to run one build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub task: TaskId,
    pub key: LogicalKey,
    pub script: String,
    pub user: User,
    pub record_sets: BTreeSet<String>,
}

impl BuildRequest {
    pub fn for_task(task: &Task) -> Self {
        Self {
            task: task.id(),
            key: task.key().clone(),
            script: task.snapshot().script.clone(),
            user: task.user().clone(),
            record_sets: task.record_sets().clone(),
        }
    }
}

/// Trait abstracting how dispatched builds are executed.
///
/// `start` must not block on the build itself: it hands the work off and
/// returns. The outcome arrives later through the reporter, possibly from
/// another thread. An `Err` from `start` means the build never began; the
/// engine then records the task as `SYSTEM_ERROR`.
pub trait BuildScheduler: Send + Sync {
    fn start(&self, request: BuildRequest, reporter: BuildReporter) -> Result<()>;

    /// Best-effort request to stop a running build.
    fn cancel(&self, task: TaskId) -> Result<()>;
}
