// src/store/mod.rs

//! Persistence port.
//!
//! The engine never owns durable state. It asks a [`Datastore`] for
//! configuration snapshots and previous build results, and hands it the
//! build-set records and finished builds it produces.
//!
//! - [`memory`] provides `MemoryDatastore`, used by the CLI and in tests.

use std::collections::BTreeSet;
use std::fmt::Debug;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::dag::{TaskSetStatus, TaskStatus};
use crate::types::{ConfigId, ConfigSetId, LogicalKey, Revision, TaskId, TaskSetId, User};

pub mod memory;

pub use memory::MemoryDatastore;

/// Immutable view of a configuration at one revision.
///
/// Tasks build snapshots, never the mutable configuration, so edits made while
/// a graph is in flight do not change what it builds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationSnapshot {
    pub config: ConfigId,
    pub revision: Revision,
    /// Command the scheduler runs for this configuration.
    pub script: String,
    /// Configurations this one depends on, as of this revision.
    pub dependencies: BTreeSet<ConfigId>,
}

impl ConfigurationSnapshot {
    pub fn key(&self) -> LogicalKey {
        LogicalKey::new(self.config.clone(), self.revision)
    }
}

/// A named group of configurations that is built as one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationSet {
    pub id: ConfigSetId,
    pub members: Vec<ConfigId>,
    pub release_train: Option<String>,
}

impl ConfigurationSet {
    pub fn new(id: impl Into<ConfigSetId>, members: impl IntoIterator<Item = ConfigId>) -> Self {
        Self {
            id: id.into(),
            members: members.into_iter().collect(),
            release_train: None,
        }
    }

    pub fn with_release_train(mut self, train: impl Into<String>) -> Self {
        self.release_train = Some(train.into());
        self
    }
}

/// Persisted form of a build set.
///
/// Saved once at creation (`id == None`, the store assigns one) and once more
/// when the last member finishes.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSetRecord {
    pub id: Option<TaskSetId>,
    pub config_set: ConfigSetId,
    pub user: User,
    pub rebuild_all: bool,
    pub release_train: Option<String>,
    pub status: TaskSetStatus,
    pub submitted_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub tasks: Vec<TaskId>,
}

/// Result of a build that actually ran.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildRecord {
    pub task: TaskId,
    pub key: LogicalKey,
    pub status: TaskStatus,
    pub user: User,
    pub record_sets: BTreeSet<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: DateTime<Utc>,
}

/// Persistence collaborator consumed by the engine.
///
/// Calls may block on IO; the engine keeps them off its lock paths.
pub trait Datastore: Send + Sync + Debug {
    /// Latest immutable snapshot of a configuration.
    fn latest_snapshot(&self, config: &ConfigId) -> Result<ConfigurationSnapshot>;

    /// Whether this configuration revision already has a successful build.
    fn has_successful_build(&self, key: &LogicalKey) -> Result<bool>;

    /// Insert or update a build-set record; returns it with its id assigned.
    fn save_task_set_record(&self, record: TaskSetRecord) -> Result<TaskSetRecord>;

    /// Allocate a fresh process-local task id.
    fn next_task_id(&self) -> TaskId;

    /// Look up a configuration set by name.
    fn configuration_set(&self, id: &ConfigSetId) -> Result<ConfigurationSet>;

    /// Record the outcome of a build that ran.
    fn store_build_record(&self, record: BuildRecord) -> Result<()>;
}
