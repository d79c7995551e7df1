// src/store/memory.rs

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Result};

use super::{BuildRecord, ConfigurationSet, ConfigurationSnapshot, Datastore, TaskSetRecord};
use crate::config::ConfigFile;
use crate::dag::TaskStatus;
use crate::types::{ConfigId, ConfigSetId, LogicalKey, Revision, TaskId, TaskSetId};

#[derive(Debug, Default)]
struct Inner {
    /// Every revision ever stored, per configuration; the last one is "latest".
    configurations: HashMap<ConfigId, Vec<ConfigurationSnapshot>>,
    sets: HashMap<ConfigSetId, ConfigurationSet>,
    successful: HashSet<LogicalKey>,
    task_sets: HashMap<TaskSetId, TaskSetRecord>,
    builds: Vec<BuildRecord>,
    /// Configurations whose snapshot lookup should fail (fault injection).
    broken: HashSet<ConfigId>,
    fail_task_set_saves: bool,
}

/// In-memory [`Datastore`].
///
/// Cheap to clone; clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatastore {
    inner: Arc<Mutex<Inner>>,
    next_task: Arc<AtomicU64>,
    next_set: Arc<AtomicU64>,
}

impl MemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store holding every configuration and set of a validated config file.
    pub fn from_config(cfg: &ConfigFile) -> Self {
        let store = Self::new();

        for (name, conf) in cfg.configuration.iter() {
            let deps = conf.depends_on.iter().cloned().collect();
            store.put_revision(
                ConfigId::new(name.clone()),
                Revision(conf.revision),
                conf.script.clone(),
                deps,
            );
        }

        for (name, set) in cfg.set.iter() {
            let mut cs = ConfigurationSet::new(
                ConfigSetId::new(name.clone()),
                set.members.iter().cloned(),
            );
            cs.release_train = set.release_train.clone();
            store.add_set(cs);
        }

        store
    }

    /// Store a new revision of `config`, one past the current latest (or 1).
    pub fn add_configuration(
        &self,
        config: impl Into<ConfigId>,
        script: impl Into<String>,
        dependencies: impl IntoIterator<Item = ConfigId>,
    ) -> Revision {
        let config = config.into();
        let next = self
            .latest_revision(&config)
            .map(|r| Revision(r.0 + 1))
            .unwrap_or(Revision(1));
        self.put_revision(config, next, script.into(), dependencies.into_iter().collect());
        next
    }

    fn put_revision(
        &self,
        config: ConfigId,
        revision: Revision,
        script: String,
        dependencies: BTreeSet<ConfigId>,
    ) {
        let snapshot = ConfigurationSnapshot {
            config: config.clone(),
            revision,
            script,
            dependencies,
        };
        let mut inner = self.lock();
        inner.configurations.entry(config).or_default().push(snapshot);
    }

    pub fn latest_revision(&self, config: &ConfigId) -> Option<Revision> {
        let inner = self.lock();
        inner
            .configurations
            .get(config)
            .and_then(|revs| revs.last())
            .map(|s| s.revision)
    }

    pub fn add_set(&self, set: ConfigurationSet) {
        let mut inner = self.lock();
        inner.sets.insert(set.id.clone(), set);
    }

    /// Pretend `key` was already built successfully.
    pub fn mark_built(&self, key: LogicalKey) {
        let mut inner = self.lock();
        inner.successful.insert(key);
    }

    /// Make snapshot lookups for `config` fail.
    pub fn break_configuration(&self, config: impl Into<ConfigId>) {
        let mut inner = self.lock();
        inner.broken.insert(config.into());
    }

    /// Make every build-set save fail.
    pub fn fail_task_set_saves(&self, fail: bool) {
        let mut inner = self.lock();
        inner.fail_task_set_saves = fail;
    }

    pub fn task_set_record(&self, id: TaskSetId) -> Option<TaskSetRecord> {
        let inner = self.lock();
        inner.task_sets.get(&id).cloned()
    }

    pub fn task_set_records(&self) -> Vec<TaskSetRecord> {
        let inner = self.lock();
        let mut records: Vec<_> = inner.task_sets.values().cloned().collect();
        records.sort_by_key(|r| r.id);
        records
    }

    pub fn build_records(&self) -> Vec<BuildRecord> {
        let inner = self.lock();
        inner.builds.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Datastore for MemoryDatastore {
    fn latest_snapshot(&self, config: &ConfigId) -> Result<ConfigurationSnapshot> {
        let inner = self.lock();
        if inner.broken.contains(config) {
            return Err(anyhow!("snapshot of configuration '{config}' is unavailable"));
        }
        inner
            .configurations
            .get(config)
            .and_then(|revs| revs.last())
            .cloned()
            .ok_or_else(|| anyhow!("unknown configuration '{config}'"))
    }

    fn has_successful_build(&self, key: &LogicalKey) -> Result<bool> {
        let inner = self.lock();
        Ok(inner.successful.contains(key))
    }

    fn save_task_set_record(&self, mut record: TaskSetRecord) -> Result<TaskSetRecord> {
        let mut inner = self.lock();
        if inner.fail_task_set_saves {
            return Err(anyhow!("task set storage is unavailable"));
        }
        let id = match record.id {
            Some(id) => id,
            None => TaskSetId(self.next_set.fetch_add(1, Ordering::SeqCst) + 1),
        };
        record.id = Some(id);
        inner.task_sets.insert(id, record.clone());
        Ok(record)
    }

    fn next_task_id(&self) -> TaskId {
        TaskId(self.next_task.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn configuration_set(&self, id: &ConfigSetId) -> Result<ConfigurationSet> {
        let inner = self.lock();
        inner
            .sets
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow!("unknown configuration set '{id}'"))
    }

    fn store_build_record(&self, record: BuildRecord) -> Result<()> {
        let mut inner = self.lock();
        if record.status == TaskStatus::Done {
            inner.successful.insert(record.key.clone());
        }
        inner.builds.push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_revisions_become_latest() {
        let store = MemoryDatastore::new();
        let r1 = store.add_configuration("core", "make", []);
        let r2 = store.add_configuration("core", "make all", []);

        assert_eq!(r1, Revision(1));
        assert_eq!(r2, Revision(2));

        let snap = store.latest_snapshot(&"core".into()).unwrap();
        assert_eq!(snap.revision, Revision(2));
        assert_eq!(snap.script, "make all");
    }

    #[test]
    fn broken_configuration_fails_lookup() {
        let store = MemoryDatastore::new();
        store.add_configuration("core", "make", []);
        store.break_configuration("core");

        let err = store.latest_snapshot(&"core".into()).unwrap_err();
        assert!(err.to_string().contains("unavailable"));
    }

    #[test]
    fn task_set_saves_assign_stable_ids() {
        let store = MemoryDatastore::new();
        let record = TaskSetRecord {
            id: None,
            config_set: "release".into(),
            user: crate::types::User::new("ci"),
            rebuild_all: false,
            release_train: None,
            status: crate::dag::TaskSetStatus::New,
            submitted_at: chrono::Utc::now(),
            ended_at: None,
            tasks: Vec::new(),
        };

        let saved = store.save_task_set_record(record).unwrap();
        let id = saved.id.unwrap();

        let again = store.save_task_set_record(saved).unwrap();
        assert_eq!(again.id, Some(id));
        assert_eq!(store.task_set_records().len(), 1);
    }

    #[test]
    fn storing_a_done_build_marks_it_successful() {
        let store = MemoryDatastore::new();
        let key = LogicalKey::new("core".into(), Revision(1));
        assert!(!store.has_successful_build(&key).unwrap());

        store
            .store_build_record(BuildRecord {
                task: TaskId(1),
                key: key.clone(),
                status: TaskStatus::Done,
                user: crate::types::User::new("ci"),
                record_sets: BTreeSet::new(),
                started_at: None,
                ended_at: chrono::Utc::now(),
            })
            .unwrap();

        assert!(store.has_successful_build(&key).unwrap());
    }
}
