// src/engine/transition.rs

//! The one place task statuses change.
//!
//! `set_status` applies a transition in five steps:
//!
//! 1. swap the status under the task lock (refused if the state machine says no);
//! 2. if terminal, release the task's registry slot;
//! 3. emit the status-changed event;
//! 4. if terminal and part of a build set, fold it into the set's aggregate;
//! 5. if terminal, run completion propagation over the dependents.
//!
//! Steps 1-3 happen under the task lock so listeners see one task's
//! transitions in the order they were applied. A finished build's record is
//! stored there too, before step 2, so a submitter that wins the freed slot
//! also sees the record.
//!
//! Steps 4-5 can finish further tasks (rejections, cascaded cancellations, or
//! synchronous completions from the scheduler). They are queued on a
//! per-thread worklist and drained by the outermost `set_status` on that
//! thread, so a long chain never grows the stack.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::dag::{Task, TaskState, TaskStatus, Transition};
use crate::notify::TaskStatusChanged;
use crate::store::BuildRecord;
use crate::types::User;

use super::coordinator::EngineInner;

thread_local! {
    /// Terminal transitions whose follow-up work is still pending on this
    /// thread. `Some` while an outer `set_status` is draining it.
    static FOLLOW_UPS: RefCell<Option<VecDeque<FollowUp>>> = const { RefCell::new(None) };
}

struct FollowUp {
    engine: Arc<EngineInner>,
    task: Arc<Task>,
    transition: Transition,
}

/// Clears the worklist when the draining frame exits, unwinding included.
struct Draining;

impl Drop for Draining {
    fn drop(&mut self) {
        FOLLOW_UPS.with(|q| *q.borrow_mut() = None);
    }
}

impl EngineInner {
    /// Apply `next` to `task`. Returns whether the transition was applied.
    pub(crate) fn set_status(
        &self,
        task: &Arc<Task>,
        next: TaskStatus,
        description: Option<String>,
        actor: &User,
    ) -> bool {
        let applied = task.transition_with(next, description, |t, state| {
            if t.to.is_terminal() {
                if records_build(t.to) && task.is_released() {
                    self.store_build_record(task, t, state);
                }
                self.registry.release(task.key(), task.id());
            }
            self.sink.on_task_status_changed(status_event(task, t, actor));
        });

        let Some(transition) = applied else {
            debug!(
                task = %task.id(),
                current = %task.status(),
                requested = %next,
                "transition not applied"
            );
            return false;
        };

        debug!(
            task = %task.id(),
            key = %task.key(),
            from = %transition.from,
            to = %transition.to,
            "task status changed"
        );

        if transition.to.is_terminal() {
            self.follow_up(task, transition);
        }
        true
    }

    /// Run `on_terminal` now if nothing is draining on this thread, otherwise
    /// queue it for the frame that is.
    fn follow_up(&self, task: &Arc<Task>, transition: Transition) {
        let Some(engine) = self.this.upgrade() else {
            self.on_terminal(task, &transition);
            return;
        };
        let item = FollowUp {
            engine,
            task: Arc::clone(task),
            transition,
        };

        let first = FOLLOW_UPS.with(|q| {
            let mut q = q.borrow_mut();
            if let Some(pending) = q.as_mut() {
                pending.push_back(item);
                return None;
            }
            *q = Some(VecDeque::new());
            Some(item)
        });
        let Some(first) = first else {
            return;
        };

        let _draining = Draining;
        let mut next = Some(first);
        while let Some(item) = next {
            item.engine.on_terminal(&item.task, &item.transition);
            next = FOLLOW_UPS.with(|q| q.borrow_mut().as_mut().and_then(VecDeque::pop_front));
        }
    }

    fn on_terminal(&self, task: &Arc<Task>, transition: &Transition) {
        match transition.to {
            TaskStatus::Done => info!(task = %task.id(), key = %task.key(), "build succeeded"),
            TaskStatus::DoneWithErrors | TaskStatus::SystemError | TaskStatus::Rejected => warn!(
                task = %task.id(),
                key = %task.key(),
                status = %transition.to,
                reason = transition.description.as_deref().unwrap_or(""),
                "build did not succeed"
            ),
            _ => info!(task = %task.id(), key = %task.key(), status = %transition.to, "task finished"),
        }

        if let Some(set_id) = task.task_set() {
            if let Some(set) = self.task_set(set_id) {
                if let Some(record) = set.member_finished(task, transition.to, self.sink.as_ref()) {
                    if let Err(err) = self.datastore.save_task_set_record(record) {
                        error!(set = %set_id, error = %format!("{err:#}"), "failed to persist finished build set");
                    }
                }
            }
        }

        self.propagate(task);
    }

    fn store_build_record(&self, task: &Task, transition: &Transition, state: &TaskState) {
        let record = BuildRecord {
            task: task.id(),
            key: task.key().clone(),
            status: transition.to,
            user: task.user().clone(),
            record_sets: task.record_sets().clone(),
            started_at: state.started_at,
            ended_at: state.ended_at.unwrap_or_else(Utc::now),
        };
        if let Err(err) = self.datastore.store_build_record(record) {
            error!(task = %task.id(), error = %format!("{err:#}"), "failed to store build result");
        }
    }
}

/// Outcomes that leave a build record behind.
fn records_build(status: TaskStatus) -> bool {
    matches!(
        status,
        TaskStatus::Done | TaskStatus::DoneWithErrors | TaskStatus::SystemError
    )
}

fn status_event(task: &Task, t: &Transition, actor: &User) -> TaskStatusChanged {
    TaskStatusChanged {
        task: t.task,
        key: task.key().clone(),
        task_set: task.task_set(),
        from: t.from,
        to: t.to,
        at: t.at,
        actor: actor.clone(),
        description: t.description.clone(),
    }
}
