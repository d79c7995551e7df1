// src/dag/task.rs

//! A single build of one configuration revision, plus its per-task state.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::dag::status::TaskStatus;
use crate::store::ConfigurationSnapshot;
use crate::types::{LogicalKey, TaskId, TaskSetId, User};

/// Per-request build options copied onto every task of the request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOptions {
    /// Build even if this revision already has a successful build.
    pub rebuild_all: bool,
    /// Record sets the build results should be attached to.
    pub record_sets: BTreeSet<String>,
}

impl BuildOptions {
    pub fn rebuild_all() -> Self {
        Self {
            rebuild_all: true,
            ..Self::default()
        }
    }

    pub fn with_record_set(mut self, name: impl Into<String>) -> Self {
        self.record_sets.insert(name.into());
        self
    }
}

/// Mutable part of a task; only ever touched under the task's lock.
#[derive(Debug, Clone)]
pub struct TaskState {
    pub status: TaskStatus,
    pub description: Option<String>,
    pub has_failed: bool,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// A status change that was actually applied.
#[derive(Debug, Clone)]
pub struct Transition {
    pub task: TaskId,
    pub from: TaskStatus,
    pub to: TaskStatus,
    pub at: DateTime<Utc>,
    pub description: Option<String>,
}

/// One build of one configuration revision.
///
/// Edges (`dependencies` / `dependents`) are task ids into the engine's arena
/// and are frozen once the graph is built. Everything that changes over the
/// task's life lives in [`TaskState`] behind a mutex.
pub struct Task {
    id: TaskId,
    key: LogicalKey,
    snapshot: Arc<ConfigurationSnapshot>,
    user: User,
    options: BuildOptions,
    task_set: Option<TaskSetId>,
    dependencies: BTreeSet<TaskId>,
    dependents: BTreeSet<TaskId>,
    state: Mutex<TaskState>,
    /// Set once the task has been handed to the dispatch path.
    released: AtomicBool,
}

impl Task {
    pub fn new(
        id: TaskId,
        snapshot: ConfigurationSnapshot,
        user: User,
        options: BuildOptions,
    ) -> Self {
        Self {
            id,
            key: snapshot.key(),
            snapshot: Arc::new(snapshot),
            user,
            options,
            task_set: None,
            dependencies: BTreeSet::new(),
            dependents: BTreeSet::new(),
            state: Mutex::new(TaskState {
                status: TaskStatus::New,
                description: None,
                has_failed: false,
                submitted_at: Utc::now(),
                started_at: None,
                ended_at: None,
            }),
            released: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn key(&self) -> &LogicalKey {
        &self.key
    }

    pub fn snapshot(&self) -> &Arc<ConfigurationSnapshot> {
        &self.snapshot
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn rebuild_all(&self) -> bool {
        self.options.rebuild_all
    }

    pub fn record_sets(&self) -> &BTreeSet<String> {
        &self.options.record_sets
    }

    pub fn task_set(&self) -> Option<TaskSetId> {
        self.task_set
    }

    pub fn dependencies(&self) -> &BTreeSet<TaskId> {
        &self.dependencies
    }

    pub fn dependents(&self) -> &BTreeSet<TaskId> {
        &self.dependents
    }

    pub fn status(&self) -> TaskStatus {
        self.lock().status
    }

    pub fn has_failed(&self) -> bool {
        self.lock().has_failed
    }

    pub fn description(&self) -> Option<String> {
        self.lock().description.clone()
    }

    /// Copy of the current mutable state.
    pub fn state(&self) -> TaskState {
        self.lock().clone()
    }

    pub(crate) fn set_task_set(&mut self, id: TaskSetId) {
        self.task_set = Some(id);
    }

    pub(crate) fn add_dependency_id(&mut self, dependency: TaskId) {
        self.dependencies.insert(dependency);
    }

    pub(crate) fn add_dependent_id(&mut self, dependent: TaskId) {
        self.dependents.insert(dependent);
    }

    /// Claim the right to dispatch this task. Returns `true` exactly once.
    pub(crate) fn try_mark_released(&self) -> bool {
        self.released
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Apply `next` if the state machine allows it.
    ///
    /// `under_lock` runs while the task lock is still held and sees the
    /// updated state, so whatever it does is ordered with the swap.
    /// Returns `None` when the transition was refused.
    pub(crate) fn transition_with<F>(
        &self,
        next: TaskStatus,
        description: Option<String>,
        under_lock: F,
    ) -> Option<Transition>
    where
        F: FnOnce(&Transition, &TaskState),
    {
        let mut state = self.lock();
        let from = state.status;
        if !from.can_transition_to(next) {
            return None;
        }

        let now = Utc::now();
        state.status = next;
        if description.is_some() {
            state.description = description.clone();
        }
        if next == TaskStatus::Enqueued && state.started_at.is_none() {
            state.started_at = Some(now);
        }
        if next.is_terminal() {
            state.ended_at = Some(now);
            state.has_failed = next.is_failure();
        }

        let transition = Transition {
            task: self.id,
            from,
            to: next,
            at: now,
            description,
        };
        under_lock(&transition, &state);
        Some(transition)
    }

    fn lock(&self) -> MutexGuard<'_, TaskState> {
        // A panic under this lock cannot leave the state half-written: every
        // field is assigned before `under_lock` runs.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("status", &state.status)
            .field("dependencies", &self.dependencies)
            .field("dependents", &self.dependents)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConfigId, Revision};

    fn task() -> Task {
        let snapshot = ConfigurationSnapshot {
            config: ConfigId::new("core"),
            revision: Revision(2),
            script: "make".to_string(),
            dependencies: BTreeSet::new(),
        };
        Task::new(TaskId(1), snapshot, User::new("ci"), BuildOptions::default())
    }

    #[test]
    fn terminal_transition_records_end_and_failure() {
        let t = task();
        assert!(t.transition_with(TaskStatus::Enqueued, None, |_, _| {}).is_some());
        let applied = t
            .transition_with(TaskStatus::DoneWithErrors, Some("exit 2".into()), |_, _| {})
            .unwrap();

        assert_eq!(applied.from, TaskStatus::Enqueued);
        let state = t.state();
        assert!(state.has_failed);
        assert!(state.started_at.is_some());
        assert!(state.ended_at.is_some());
        assert_eq!(state.description.as_deref(), Some("exit 2"));
    }

    #[test]
    fn refused_transition_does_not_run_callback() {
        let t = task();
        t.transition_with(TaskStatus::Cancelled, None, |_, _| {}).unwrap();

        let mut ran = false;
        let res = t.transition_with(TaskStatus::Done, None, |_, _| ran = true);
        assert!(res.is_none());
        assert!(!ran);
        assert_eq!(t.status(), TaskStatus::Cancelled);
        assert!(!t.has_failed());
    }

    #[test]
    fn release_flag_is_claimed_once() {
        let t = task();
        assert!(t.try_mark_released());
        assert!(!t.try_mark_released());
        assert!(t.is_released());
    }
}
