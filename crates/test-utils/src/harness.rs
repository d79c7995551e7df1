use std::sync::Arc;

use buildcoord::dag::{TaskSetStatus, TaskStatus};
use buildcoord::engine::{CoordinationEngine, EngineOptions};
use buildcoord::exec::BuildScheduler;
use buildcoord::notify::{EngineEvent, EventBus, TaskStatusChanged};
use buildcoord::store::MemoryDatastore;
use buildcoord::types::TaskId;
use tokio::sync::mpsc;

/// An engine wired to a memory store, a test scheduler and an event bus
/// that was subscribed to before anything happened.
pub struct Harness<S> {
    pub engine: CoordinationEngine,
    pub store: MemoryDatastore,
    pub scheduler: Arc<S>,
    pub bus: Arc<EventBus>,
    events: mpsc::UnboundedReceiver<EngineEvent>,
    seen: Vec<EngineEvent>,
}

impl<S: BuildScheduler + 'static> Harness<S> {
    pub fn new(store: MemoryDatastore, scheduler: S) -> Self {
        Self::with_options(store, scheduler, EngineOptions::default())
    }

    pub fn with_options(store: MemoryDatastore, scheduler: S, options: EngineOptions) -> Self {
        let scheduler = Arc::new(scheduler);
        let bus = Arc::new(EventBus::new());
        let events = bus.subscribe();
        let engine = CoordinationEngine::new(
            Arc::new(store.clone()),
            scheduler.clone(),
            bus.clone(),
            options,
        );
        Self {
            engine,
            store,
            scheduler,
            bus,
            events,
            seen: Vec::new(),
        }
    }

    /// Every event published so far.
    pub fn events(&mut self) -> &[EngineEvent] {
        while let Ok(event) = self.events.try_recv() {
            self.seen.push(event);
        }
        &self.seen
    }

    /// Applied transitions of one task, in order.
    pub fn transitions(&mut self, task: TaskId) -> Vec<TaskStatusChanged> {
        self.events()
            .iter()
            .filter_map(|e| match e {
                EngineEvent::Task(t) if t.task == task => Some(t.clone()),
                _ => None,
            })
            .collect()
    }

    /// Target statuses of one task, in order.
    pub fn path(&mut self, task: TaskId) -> Vec<TaskStatus> {
        self.transitions(task).into_iter().map(|t| t.to).collect()
    }

    /// Aggregate statuses the build sets moved through, in order.
    pub fn set_path(&mut self) -> Vec<TaskSetStatus> {
        self.events()
            .iter()
            .filter_map(|e| match e {
                EngineEvent::TaskSet(s) => Some(s.to),
                _ => None,
            })
            .collect()
    }

    pub fn status(&self, task: TaskId) -> TaskStatus {
        self.engine
            .task(task)
            .map(|t| t.status())
            .unwrap_or_else(|| panic!("{task} is not tracked"))
    }
}
