// src/engine/reporter.rs

use std::fmt;
use std::sync::Weak;

use tracing::debug;

use crate::dag::{FinalStatus, TaskStatus};
use crate::types::TaskId;

use super::coordinator::EngineInner;

/// Callback handle given to the scheduler with every dispatched build.
///
/// Each method returns whether the transition was applied. A report for a
/// task that is already terminal (for example cancelled while the build kept
/// running) is ignored and returns `false`. The reporter does not keep the
/// engine alive.
#[derive(Clone)]
pub struct BuildReporter {
    engine: Weak<EngineInner>,
    task: TaskId,
}

impl BuildReporter {
    pub(crate) fn new(engine: Weak<EngineInner>, task: TaskId) -> Self {
        Self { engine, task }
    }

    pub fn task_id(&self) -> TaskId {
        self.task
    }

    pub fn building(&self) -> bool {
        self.report(TaskStatus::Building, None)
    }

    pub fn storing_results(&self) -> bool {
        self.report(TaskStatus::StoringResults, None)
    }

    pub fn complete(&self, status: FinalStatus) -> bool {
        self.report(status.into(), None)
    }

    /// Like [`complete`](Self::complete), with a human-readable reason.
    pub fn complete_with(&self, status: FinalStatus, description: impl Into<String>) -> bool {
        self.report(status.into(), Some(description.into()))
    }

    fn report(&self, status: TaskStatus, description: Option<String>) -> bool {
        let Some(engine) = self.engine.upgrade() else {
            debug!(task = %self.task, status = %status, "engine gone; dropping report");
            return false;
        };
        let Some(task) = engine.task(self.task) else {
            debug!(task = %self.task, status = %status, "report for unknown task");
            return false;
        };
        let actor = task.user().clone();
        engine.set_status(&task, status, description, &actor)
    }
}

impl fmt::Debug for BuildReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildReporter").field("task", &self.task).finish()
    }
}
