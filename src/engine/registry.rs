// src/engine/registry.rs

//! Active-task registry: the single source of truth for duplicate-build
//! detection and for what is currently queued or building.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use tracing::trace;

use crate::types::{LogicalKey, TaskId};

/// Concurrent map `LogicalKey -> TaskId` of dispatched, non-terminal tasks.
///
/// Entries are added at dispatch and removed when the holding task becomes
/// terminal. Only the engine mutates it.
#[derive(Debug, Default)]
pub struct ActiveTaskRegistry {
    active: Mutex<HashMap<LogicalKey, TaskId>>,
}

impl ActiveTaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically claim `key` for `task`.
    ///
    /// Under concurrent callers for the same key exactly one succeeds; the
    /// others get the holder's id back. Re-acquiring a key the task already
    /// holds succeeds.
    pub fn try_acquire(&self, key: &LogicalKey, task: TaskId) -> Result<(), TaskId> {
        let mut active = self.lock();
        match active.get(key) {
            Some(holder) if *holder != task => Err(*holder),
            Some(_) => Ok(()),
            None => {
                active.insert(key.clone(), task);
                trace!(key = %key, task = %task, "registry slot acquired");
                Ok(())
            }
        }
    }

    /// Drop `key` if, and only if, `task` holds it.
    pub fn release(&self, key: &LogicalKey, task: TaskId) -> bool {
        let mut active = self.lock();
        if active.get(key) == Some(&task) {
            active.remove(key);
            trace!(key = %key, task = %task, "registry slot released");
            true
        } else {
            false
        }
    }

    pub fn find(&self, key: &LogicalKey) -> Option<TaskId> {
        self.lock().get(key).copied()
    }

    /// Snapshot of the active task ids, in id order.
    pub fn list_active(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.lock().values().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<LogicalKey, TaskId>> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};
    use std::thread;

    use super::*;
    use crate::types::Revision;

    fn key(rev: u32) -> LogicalKey {
        LogicalKey::new("core".into(), Revision(rev))
    }

    #[test]
    fn second_acquire_reports_holder() {
        let reg = ActiveTaskRegistry::new();
        assert_eq!(reg.try_acquire(&key(1), TaskId(1)), Ok(()));
        assert_eq!(reg.try_acquire(&key(1), TaskId(2)), Err(TaskId(1)));
        assert_eq!(reg.try_acquire(&key(2), TaskId(2)), Ok(()));
        assert_eq!(reg.list_active(), vec![TaskId(1), TaskId(2)]);
    }

    #[test]
    fn release_only_by_holder() {
        let reg = ActiveTaskRegistry::new();
        reg.try_acquire(&key(1), TaskId(1)).unwrap();

        assert!(!reg.release(&key(1), TaskId(9)));
        assert_eq!(reg.find(&key(1)), Some(TaskId(1)));

        assert!(reg.release(&key(1), TaskId(1)));
        assert!(reg.is_empty());
    }

    #[test]
    fn exactly_one_concurrent_acquire_wins() {
        for _ in 0..50 {
            let reg = Arc::new(ActiveTaskRegistry::new());
            let barrier = Arc::new(Barrier::new(8));
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let reg = Arc::clone(&reg);
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        reg.try_acquire(&key(1), TaskId(i)).is_ok()
                    })
                })
                .collect();

            let wins = handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|won| *won)
                .count();
            assert_eq!(wins, 1);
            assert_eq!(reg.len(), 1);
        }
    }
}
