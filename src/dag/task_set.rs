// src/dag/task_set.rs

//! Build-set aggregation.
//!
//! A [`TaskSet`] folds the terminal statuses of its members into one overall
//! status:
//!
//! - the first failed member makes the set `Failed`, and it stays that way;
//! - once every member is terminal the set is finished: `Failed` if any member
//!   failed, otherwise `Cancelled` if any member was cancelled, otherwise
//!   `Success`.
//!
//! Finishing happens exactly once and yields the record the engine persists.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::dag::status::{TaskSetStatus, TaskStatus};
use crate::dag::task::Task;
use crate::notify::{NotificationSink, TaskSetStatusChanged};
use crate::store::TaskSetRecord;
use crate::types::{ConfigSetId, TaskId, TaskSetId, User};

#[derive(Debug)]
struct Aggregate {
    status: TaskSetStatus,
    terminal: HashSet<TaskId>,
    any_cancelled: bool,
    ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct TaskSet {
    id: TaskSetId,
    config_set: ConfigSetId,
    user: User,
    rebuild_all: bool,
    release_train: Option<String>,
    submitted_at: DateTime<Utc>,
    members: Vec<TaskId>,
    state: Mutex<Aggregate>,
}

impl TaskSet {
    /// Wrap a record the datastore has just assigned `id` to.
    pub fn from_record(id: TaskSetId, record: TaskSetRecord) -> Self {
        Self {
            id,
            config_set: record.config_set,
            user: record.user,
            rebuild_all: record.rebuild_all,
            release_train: record.release_train,
            submitted_at: record.submitted_at,
            members: record.tasks,
            state: Mutex::new(Aggregate {
                status: record.status,
                terminal: HashSet::new(),
                any_cancelled: false,
                ended_at: record.ended_at,
            }),
        }
    }

    pub fn id(&self) -> TaskSetId {
        self.id
    }

    pub fn config_set(&self) -> &ConfigSetId {
        &self.config_set
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn rebuild_all(&self) -> bool {
        self.rebuild_all
    }

    pub fn release_train(&self) -> Option<&str> {
        self.release_train.as_deref()
    }

    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }

    pub fn members(&self) -> &[TaskId] {
        &self.members
    }

    pub fn status(&self) -> TaskSetStatus {
        self.lock().status
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.lock().ended_at
    }

    /// True once every member is terminal.
    pub fn is_finished(&self) -> bool {
        self.lock().ended_at.is_some()
    }

    /// Move a fresh set to `InProgress` when its first tasks are dispatched.
    pub(crate) fn mark_in_progress(&self, sink: &dyn NotificationSink) {
        let mut agg = self.lock();
        if agg.status != TaskSetStatus::New {
            return;
        }
        agg.status = TaskSetStatus::InProgress;
        sink.on_task_set_status_changed(self.event(TaskSetStatus::New, &agg, Utc::now()));
    }

    /// Fold one member's terminal status into the aggregate.
    ///
    /// Returns the record to persist when this call finished the set; every
    /// later call returns `None`.
    pub(crate) fn member_finished(
        &self,
        task: &Task,
        status: TaskStatus,
        sink: &dyn NotificationSink,
    ) -> Option<TaskSetRecord> {
        let mut agg = self.lock();
        if agg.ended_at.is_some() || !agg.terminal.insert(task.id()) {
            return None;
        }

        let before = agg.status;
        if status.is_failure() {
            agg.status = TaskSetStatus::Failed;
        } else if status == TaskStatus::Cancelled {
            agg.any_cancelled = true;
        }

        let now = Utc::now();
        let all_terminal = self.members.iter().all(|m| agg.terminal.contains(m));
        if all_terminal {
            if agg.status != TaskSetStatus::Failed {
                agg.status = if agg.any_cancelled {
                    TaskSetStatus::Cancelled
                } else {
                    TaskSetStatus::Success
                };
            }
            agg.ended_at = Some(now);
        } else if agg.status == TaskSetStatus::New {
            agg.status = TaskSetStatus::InProgress;
        }

        if agg.status != before || all_terminal {
            sink.on_task_set_status_changed(self.event(before, &agg, now));
        }

        if !all_terminal {
            debug!(
                set = %self.id,
                task = %task.id(),
                done = agg.terminal.len(),
                total = self.members.len(),
                "build set member finished"
            );
            return None;
        }

        info!(set = %self.id, status = %agg.status, "build set finished");
        Some(TaskSetRecord {
            id: Some(self.id),
            config_set: self.config_set.clone(),
            user: self.user.clone(),
            rebuild_all: self.rebuild_all,
            release_train: self.release_train.clone(),
            status: agg.status,
            submitted_at: self.submitted_at,
            ended_at: agg.ended_at,
            tasks: self.members.clone(),
        })
    }

    fn event(&self, from: TaskSetStatus, agg: &Aggregate, at: DateTime<Utc>) -> TaskSetStatusChanged {
        TaskSetStatusChanged {
            task_set: self.id,
            config_set: self.config_set.clone(),
            from,
            to: agg.status,
            at,
            finished: agg.ended_at.is_some(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Aggregate> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::dag::task::BuildOptions;
    use crate::notify::{EngineEvent, EventBus};
    use crate::store::ConfigurationSnapshot;
    use crate::types::{ConfigId, Revision};

    fn task(id: u64) -> Task {
        let snapshot = ConfigurationSnapshot {
            config: ConfigId::new(format!("c{id}")),
            revision: Revision(1),
            script: String::new(),
            dependencies: BTreeSet::new(),
        };
        Task::new(TaskId(id), snapshot, User::new("ci"), BuildOptions::default())
    }

    fn set(members: &[u64]) -> TaskSet {
        TaskSet::from_record(
            TaskSetId(7),
            TaskSetRecord {
                id: Some(TaskSetId(7)),
                config_set: "release".into(),
                user: User::new("ci"),
                rebuild_all: false,
                release_train: None,
                status: TaskSetStatus::New,
                submitted_at: Utc::now(),
                ended_at: None,
                tasks: members.iter().map(|m| TaskId(*m)).collect(),
            },
        )
    }

    #[test]
    fn success_when_all_members_complete() {
        let bus = EventBus::new();
        let s = set(&[1, 2]);
        s.mark_in_progress(&bus);

        assert!(s.member_finished(&task(1), TaskStatus::Done, &bus).is_none());
        assert_eq!(s.status(), TaskSetStatus::InProgress);

        let record = s
            .member_finished(&task(2), TaskStatus::RejectedAlreadyBuilt, &bus)
            .unwrap();
        assert_eq!(record.status, TaskSetStatus::Success);
        assert!(record.ended_at.is_some());
        assert!(s.is_finished());
    }

    #[test]
    fn first_failure_wins_and_finishes_once() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let s = set(&[1, 2, 3]);

        assert!(s.member_finished(&task(1), TaskStatus::DoneWithErrors, &bus).is_none());
        assert_eq!(s.status(), TaskSetStatus::Failed);
        assert!(!s.is_finished());

        assert!(s.member_finished(&task(2), TaskStatus::Done, &bus).is_none());
        let record = s.member_finished(&task(3), TaskStatus::Cancelled, &bus).unwrap();
        assert_eq!(record.status, TaskSetStatus::Failed);

        // Repeated notifications never finish the set twice.
        assert!(s.member_finished(&task(3), TaskStatus::Cancelled, &bus).is_none());

        let mut finished = 0;
        while let Ok(EngineEvent::TaskSet(e)) = rx.try_recv() {
            if e.finished {
                finished += 1;
            }
        }
        assert_eq!(finished, 1);
    }

    #[test]
    fn cancelled_member_without_failures_cancels_the_set() {
        let s = set(&[1, 2]);
        s.member_finished(&task(1), TaskStatus::Done, &crate::notify::NoopSink);
        let record = s
            .member_finished(&task(2), TaskStatus::Cancelled, &crate::notify::NoopSink)
            .unwrap();
        assert_eq!(record.status, TaskSetStatus::Cancelled);
    }
}
