// src/engine/propagation.rs

//! Completion propagation along dependency edges.
//!
//! When a task becomes terminal every dependent is looked at once:
//!
//! - the task failed: the dependent is `REJECTED`;
//! - the task was cancelled and cancellation cascades: the dependent is
//!   `CANCELLED`;
//! - otherwise, if all of the dependent's dependencies are now terminal and
//!   none of them failed, the dependent is released for dispatch.
//!
//! Several dependencies can finish at the same time on different threads, and
//! more than one of them may see "all dependencies terminal". The dependent's
//! `released` flag makes sure only one of them dispatches it.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::dag::{Task, TaskStatus};
use crate::types::User;

use super::coordinator::{Dispatch, EngineInner};

impl EngineInner {
    pub(crate) fn propagate(&self, completed: &Arc<Task>) {
        let status = completed.status();
        for id in completed.dependents() {
            let Some(dependent) = self.task(*id) else {
                trace!(task = %id, "dependent no longer tracked");
                continue;
            };

            if completed.has_failed() {
                self.set_status(
                    &dependent,
                    TaskStatus::Rejected,
                    Some(format!(
                        "dependency {} ({}) ended {}",
                        completed.key(),
                        completed.id(),
                        status
                    )),
                    &User::system(),
                );
            } else if status == TaskStatus::Cancelled && self.options.cascade_cancellation {
                self.set_status(
                    &dependent,
                    TaskStatus::Cancelled,
                    Some(format!(
                        "dependency {} ({}) was cancelled",
                        completed.key(),
                        completed.id()
                    )),
                    &User::system(),
                );
            } else if self.dependencies_satisfied(&dependent) {
                self.release(&dependent);
            }
        }
    }

    /// All dependencies terminal, none failed, and (when cancellation
    /// cascades) none cancelled.
    fn dependencies_satisfied(&self, task: &Task) -> bool {
        task.dependencies().iter().all(|id| {
            let Some(dep) = self.task(*id) else {
                // Purged dependencies belonged to a finished set.
                return true;
            };
            let status = dep.status();
            status.is_terminal()
                && !status.is_failure()
                && !(status == TaskStatus::Cancelled && self.options.cascade_cancellation)
        })
    }

    /// Hand `task` to the dispatch path, at most once over its lifetime.
    pub(crate) fn release(&self, task: &Arc<Task>) {
        if !task.try_mark_released() {
            trace!(task = %task.id(), "already released");
            return;
        }
        debug!(task = %task.id(), key = %task.key(), "dependencies satisfied; releasing");

        if let Dispatch::Conflict(holder) = self.dispatch(task) {
            self.set_status(
                task,
                TaskStatus::Rejected,
                Some(format!("already queued/building as {holder}")),
                &User::system(),
            );
        }
    }
}
