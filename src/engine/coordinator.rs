// src/engine/coordinator.rs

//! The [`CoordinationEngine`] façade.
//!
//! Accepts build requests, builds task graphs, checks for duplicates, and
//! hands ready tasks to the scheduler. Completion arrives asynchronously
//! through [`BuildReporter`]s and drives the state machine from there.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::dag::{BuildOptions, Task, TaskGraphBuilder, TaskSet, TaskSetStatus, TaskStatus};
use crate::errors::{CoordError, Result};
use crate::exec::{BuildRequest, BuildScheduler};
use crate::notify::NotificationSink;
use crate::store::{ConfigurationSet, Datastore, TaskSetRecord};
use crate::types::{ConfigId, ConfigSetId, TaskId, TaskSetId, User};

use super::registry::ActiveTaskRegistry;
use super::reporter::BuildReporter;
use super::EngineOptions;

/// Result of running one task through the dispatch path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dispatch {
    /// Handed to the scheduler (which may have refused it; see `SYSTEM_ERROR`).
    Started,
    /// Short-circuited to `REJECTED_ALREADY_BUILT`.
    AlreadyBuilt,
    /// A logically identical task holds the registry slot.
    Conflict(TaskId),
    /// The task was already terminal.
    Skipped,
}

/// Shared engine state. Reporters hold a `Weak` to it.
pub(crate) struct EngineInner {
    pub(super) datastore: Arc<dyn Datastore>,
    pub(super) scheduler: Arc<dyn BuildScheduler>,
    pub(super) sink: Arc<dyn NotificationSink>,
    pub(super) registry: ActiveTaskRegistry,
    pub(super) options: EngineOptions,
    tasks: RwLock<HashMap<TaskId, Arc<Task>>>,
    sets: RwLock<HashMap<TaskSetId, Arc<TaskSet>>>,
    pub(super) this: Weak<EngineInner>,
}

impl EngineInner {
    pub(crate) fn task(&self, id: TaskId) -> Option<Arc<Task>> {
        self.tasks
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(&id)
            .cloned()
    }

    pub(crate) fn task_set(&self, id: TaskSetId) -> Option<Arc<TaskSet>> {
        self.sets
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(&id)
            .cloned()
    }

    fn track(&self, tasks: &[Arc<Task>]) {
        let mut arena = self.tasks.write().unwrap_or_else(|p| p.into_inner());
        for t in tasks {
            arena.insert(t.id(), Arc::clone(t));
        }
    }

    fn untrack(&self, id: TaskId) {
        self.tasks
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&id);
    }

    /// Idempotence check, registry claim, `ENQUEUED`, scheduler start.
    pub(crate) fn dispatch(&self, task: &Arc<Task>) -> Dispatch {
        if task.status().is_terminal() {
            return Dispatch::Skipped;
        }

        if self.already_built(task) {
            self.reject_already_built(task);
            return Dispatch::AlreadyBuilt;
        }

        if let Err(holder) = self.registry.try_acquire(task.key(), task.id()) {
            debug!(task = %task.id(), key = %task.key(), active = %holder, "duplicate build refused");
            return Dispatch::Conflict(holder);
        }

        // A holder that just finished stored its record before letting go of
        // the slot; look again now that the slot is ours.
        if self.already_built(task) {
            self.registry.release(task.key(), task.id());
            self.reject_already_built(task);
            return Dispatch::AlreadyBuilt;
        }

        if !self.set_status(task, TaskStatus::Enqueued, None, task.user()) {
            // Cancelled between the claim and the transition.
            self.registry.release(task.key(), task.id());
            return Dispatch::Skipped;
        }

        let request = BuildRequest::for_task(task);
        let reporter = BuildReporter::new(self.this.clone(), task.id());
        info!(task = %task.id(), key = %task.key(), "dispatching build");
        match self.scheduler.start(request, reporter) {
            Ok(()) if task.status() == TaskStatus::Cancelled => {
                // Cancelled while the scheduler was starting it.
                self.forward_cancel(task.id());
            }
            Ok(()) => {}
            Err(err) => {
                error!(task = %task.id(), key = %task.key(), error = %format!("{err:#}"), "scheduler refused build");
                self.set_status(
                    task,
                    TaskStatus::SystemError,
                    Some(format!("scheduler failed to start build: {err:#}")),
                    &User::system(),
                );
            }
        }
        Dispatch::Started
    }

    /// Whether the datastore already has a successful build of the task's
    /// revision. Lookup errors count as "no": the build runs.
    fn already_built(&self, task: &Task) -> bool {
        if task.rebuild_all() {
            return false;
        }
        match self.datastore.has_successful_build(task.key()) {
            Ok(built) => built,
            Err(err) => {
                warn!(
                    task = %task.id(),
                    key = %task.key(),
                    error = %format!("{err:#}"),
                    "could not check previous builds; building anyway"
                );
                false
            }
        }
    }

    fn reject_already_built(&self, task: &Arc<Task>) {
        self.set_status(
            task,
            TaskStatus::RejectedAlreadyBuilt,
            Some(format!("{} already has a successful build", task.key())),
            &User::system(),
        );
    }

    fn forward_cancel(&self, id: TaskId) {
        if let Err(err) = self.scheduler.cancel(id) {
            warn!(task = %id, error = %format!("{err:#}"), "scheduler could not cancel build");
        }
    }
}

/// Entry point for submitting, cancelling and inspecting builds.
///
/// Cheap to clone; clones share the same engine.
#[derive(Clone)]
pub struct CoordinationEngine {
    inner: Arc<EngineInner>,
}

impl CoordinationEngine {
    pub fn new(
        datastore: Arc<dyn Datastore>,
        scheduler: Arc<dyn BuildScheduler>,
        sink: Arc<dyn NotificationSink>,
        options: EngineOptions,
    ) -> Self {
        let inner = Arc::new_cyclic(|this| EngineInner {
            datastore,
            scheduler,
            sink,
            registry: ActiveTaskRegistry::new(),
            options,
            tasks: RwLock::new(HashMap::new()),
            sets: RwLock::new(HashMap::new()),
            this: this.clone(),
        });
        Self { inner }
    }

    pub fn options(&self) -> EngineOptions {
        self.inner.options
    }

    /// Build the latest revision of one configuration, without dependencies.
    ///
    /// If the revision was already built (and `rebuild_all` is off) the task
    /// comes back in `REJECTED_ALREADY_BUILT`. If an identical build is
    /// already active nothing is dispatched and `Conflict` is returned.
    pub fn submit_build(
        &self,
        config: &ConfigId,
        user: &User,
        options: BuildOptions,
    ) -> Result<Arc<Task>> {
        let builder = TaskGraphBuilder::new(self.inner.datastore.as_ref());
        let task = Arc::new(builder.build_single(config, user, &options)?);
        info!(task = %task.id(), key = %task.key(), user = %user, "build submitted");

        self.inner.track(std::slice::from_ref(&task));
        task.try_mark_released();
        match self.inner.dispatch(&task) {
            Dispatch::Conflict(active) => {
                self.inner.untrack(task.id());
                Err(CoordError::Conflict {
                    key: task.key().clone(),
                    active,
                })
            }
            _ => Ok(task),
        }
    }

    /// Build every member of a configuration set, honouring the dependencies
    /// between members. Returns as soon as the roots are dispatched.
    pub fn submit_set(
        &self,
        set: &ConfigurationSet,
        user: &User,
        options: BuildOptions,
    ) -> Result<Arc<TaskSet>> {
        let inner = &self.inner;
        let mut graph = TaskGraphBuilder::new(inner.datastore.as_ref())
            .detect_cycles(inner.options.detect_cycles)
            .build_graph(set, user, &options)?;

        let record = TaskSetRecord {
            id: None,
            config_set: set.id.clone(),
            user: user.clone(),
            rebuild_all: options.rebuild_all,
            release_train: set.release_train.clone(),
            status: TaskSetStatus::New,
            submitted_at: Utc::now(),
            ended_at: None,
            tasks: graph.ids().collect(),
        };
        let record = inner
            .datastore
            .save_task_set_record(record)
            .map_err(|e| CoordError::Persistence(format!("{e:#}")))?;
        let set_id = record
            .id
            .ok_or_else(|| CoordError::Persistence("datastore assigned no id".to_string()))?;

        graph.assign_task_set(set_id);
        let task_set = Arc::new(TaskSet::from_record(set_id, record));
        let tasks: Vec<Arc<Task>> = graph.into_tasks().into_iter().map(Arc::new).collect();

        inner.track(&tasks);
        inner
            .sets
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(set_id, Arc::clone(&task_set));

        info!(
            set = %set_id,
            config_set = %set.id,
            tasks = tasks.len(),
            user = %user,
            "build set submitted"
        );
        task_set.mark_in_progress(inner.sink.as_ref());

        // Park everything with dependencies first, so an early completion
        // never races a task still in NEW.
        for task in tasks.iter().filter(|t| !t.dependencies().is_empty()) {
            inner.set_status(task, TaskStatus::WaitingForDependencies, None, user);
        }
        for task in tasks.iter().filter(|t| t.dependencies().is_empty()) {
            inner.release(task);
        }

        Ok(task_set)
    }

    /// Look up a configuration set in the datastore and submit it.
    pub fn submit_named_set(
        &self,
        id: &ConfigSetId,
        user: &User,
        options: BuildOptions,
    ) -> Result<Arc<TaskSet>> {
        let set = self
            .inner
            .datastore
            .configuration_set(id)
            .map_err(|e| CoordError::NotFound(format!("{e:#}")))?;
        self.submit_set(&set, user, options)
    }

    /// Cancel a task that is queued, building, or still waiting for its
    /// dependencies. Returns `false` for unknown or already finished tasks.
    pub fn cancel(&self, id: TaskId) -> bool {
        let Some(task) = self.inner.task(id) else {
            debug!(task = %id, "cancel requested for unknown task");
            return false;
        };
        if task.status().is_terminal() {
            return false;
        }

        let cancelled = self.inner.set_status(
            &task,
            TaskStatus::Cancelled,
            Some("cancelled by request".to_string()),
            task.user(),
        );
        if !cancelled {
            return false;
        }
        info!(task = %id, key = %task.key(), "task cancelled");

        // Released tasks may have reached the scheduler; waiting ones never did.
        if task.is_released() {
            self.inner.forward_cancel(id);
        }
        true
    }

    /// Cancel every unfinished member of a build set. Returns how many tasks
    /// this call cancelled directly.
    pub fn cancel_set(&self, id: TaskSetId) -> Result<usize> {
        let set = self
            .inner
            .task_set(id)
            .ok_or_else(|| CoordError::NotFound(format!("build set {id}")))?;
        Ok(set.members().iter().filter(|t| self.cancel(**t)).count())
    }

    /// Tasks currently queued or building.
    pub fn list_active(&self) -> Vec<Arc<Task>> {
        self.inner
            .registry
            .list_active()
            .into_iter()
            .filter_map(|id| self.inner.task(id))
            .collect()
    }

    pub fn task(&self, id: TaskId) -> Option<Arc<Task>> {
        self.inner.task(id)
    }

    pub fn task_set(&self, id: TaskSetId) -> Option<Arc<TaskSet>> {
        self.inner.task_set(id)
    }

    /// Tasks of a build set, in member order.
    pub fn tasks_of(&self, set: &TaskSet) -> Vec<Arc<Task>> {
        set.members()
            .iter()
            .filter_map(|id| self.inner.task(*id))
            .collect()
    }

    /// Forget finished build sets and finished stand-alone tasks.
    ///
    /// Returns how many tasks were dropped.
    pub fn purge_finished(&self) -> usize {
        let finished: Vec<Arc<TaskSet>> = {
            let mut sets = self.inner.sets.write().unwrap_or_else(|p| p.into_inner());
            let ids: Vec<TaskSetId> = sets
                .values()
                .filter(|s| s.is_finished())
                .map(|s| s.id())
                .collect();
            ids.iter().filter_map(|id| sets.remove(id)).collect()
        };

        let mut arena = self.inner.tasks.write().unwrap_or_else(|p| p.into_inner());
        let before = arena.len();
        for set in &finished {
            for id in set.members() {
                arena.remove(id);
            }
        }
        arena.retain(|_, t| t.task_set().is_some() || !t.status().is_terminal());
        let dropped = before - arena.len();

        debug!(sets = finished.len(), tasks = dropped, "purged finished work");
        dropped
    }
}

impl std::fmt::Debug for CoordinationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinationEngine")
            .field("options", &self.inner.options)
            .field("active", &self.inner.registry.len())
            .finish_non_exhaustive()
    }
}
