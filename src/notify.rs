// src/notify.rs

//! Status-change notifications.
//!
//! The engine reports every applied task transition and every build-set
//! aggregate change to a [`NotificationSink`]. Sinks are called on the
//! engine's hot path (task transitions call them while the task lock is held)
//! so implementations must not block.
//!
//! - [`EventBus`] fans events out to any number of subscribers through
//!   unbounded tokio channels.
//! - [`NoopSink`] drops everything.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::trace;

use crate::dag::{TaskSetStatus, TaskStatus};
use crate::types::{ConfigSetId, LogicalKey, TaskId, TaskSetId, User};

/// One applied task transition.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskStatusChanged {
    pub task: TaskId,
    pub key: LogicalKey,
    pub task_set: Option<TaskSetId>,
    pub from: TaskStatus,
    pub to: TaskStatus,
    pub at: DateTime<Utc>,
    /// Who caused the transition: the submitting user, or `system` for
    /// transitions the engine makes on its own.
    pub actor: User,
    pub description: Option<String>,
}

/// Aggregate status change of a build set.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSetStatusChanged {
    pub task_set: TaskSetId,
    pub config_set: ConfigSetId,
    pub from: TaskSetStatus,
    pub to: TaskSetStatus,
    pub at: DateTime<Utc>,
    /// Set on the last event of a build set, once every member is terminal.
    pub finished: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Task(TaskStatusChanged),
    TaskSet(TaskSetStatusChanged),
}

/// Receiver of engine notifications. Fire-and-forget: no return value, no retries.
pub trait NotificationSink: Send + Sync {
    fn on_task_status_changed(&self, event: TaskStatusChanged);
    fn on_task_set_status_changed(&self, event: TaskSetStatusChanged);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl NotificationSink for NoopSink {
    fn on_task_status_changed(&self, _event: TaskStatusChanged) {}
    fn on_task_set_status_changed(&self, _event: TaskSetStatusChanged) {}
}

/// Channel-backed fan-out of [`EngineEvent`]s.
///
/// Subscribers that dropped their receiver are pruned on the next publish.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<EngineEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber. Only events published afterwards are seen.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<EngineEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn publish(&self, event: EngineEvent) {
        let mut subs = self.lock();
        subs.retain(|tx| tx.send(event.clone()).is_ok());
        trace!(subscribers = subs.len(), "published engine event");
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::UnboundedSender<EngineEvent>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl NotificationSink for EventBus {
    fn on_task_status_changed(&self, event: TaskStatusChanged) {
        self.publish(EngineEvent::Task(event));
    }

    fn on_task_set_status_changed(&self, event: TaskSetStatusChanged) {
        self.publish(EngineEvent::TaskSet(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Revision;

    fn event(to: TaskStatus) -> TaskStatusChanged {
        TaskStatusChanged {
            task: TaskId(1),
            key: LogicalKey::new("core".into(), Revision(1)),
            task_set: None,
            from: TaskStatus::New,
            to,
            at: Utc::now(),
            actor: User::new("ci"),
            description: None,
        }
    }

    #[test]
    fn every_subscriber_gets_every_event_in_order() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.on_task_status_changed(event(TaskStatus::Enqueued));
        bus.on_task_status_changed(event(TaskStatus::Done));

        for rx in [&mut a, &mut b] {
            let first = rx.try_recv().unwrap();
            let second = rx.try_recv().unwrap();
            assert!(matches!(first, EngineEvent::Task(e) if e.to == TaskStatus::Enqueued));
            assert!(matches!(second, EngineEvent::Task(e) if e.to == TaskStatus::Done));
        }
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let keep = bus.subscribe();
        drop(bus.subscribe());
        assert_eq!(bus.subscriber_count(), 2);

        bus.on_task_status_changed(event(TaskStatus::Enqueued));
        assert_eq!(bus.subscriber_count(), 1);
        drop(keep);
    }
}
