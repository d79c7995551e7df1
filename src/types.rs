// src/types.rs

//! Identifier and value types shared across the engine.
//!
//! Tasks have two identities:
//! - [`TaskId`]: process-local, assigned at creation.
//! - [`LogicalKey`]: `(configuration, revision)`, used for duplicate-build
//!   detection. Two tasks building the same revision of the same
//!   configuration are "the same build" regardless of their `TaskId`.

use std::fmt;

use serde::Deserialize;

/// Process-local task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Identifier of a persisted build-set record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskSetId(pub u64);

impl fmt::Display for TaskSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "set-{}", self.0)
    }
}

/// Name of a build configuration (e.g. `"core"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(transparent)]
pub struct ConfigId(String);

impl ConfigId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConfigId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for ConfigId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Name of a configuration set (a named group of configurations built together).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConfigSetId(String);

impl ConfigSetId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConfigSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for ConfigSetId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Immutable revision number of a configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Revision(pub u32);

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Deduplication key: one configuration at one revision.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogicalKey {
    pub config: ConfigId,
    pub revision: Revision,
}

impl LogicalKey {
    pub fn new(config: ConfigId, revision: Revision) -> Self {
        Self { config, revision }
    }
}

impl fmt::Display for LogicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.config, self.revision)
    }
}

/// The user on whose behalf builds are submitted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct User(String);

impl User {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Actor used for transitions the engine performs on its own.
    pub fn system() -> Self {
        Self("system".to_string())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logical_key_ignores_everything_but_config_and_revision() {
        let a = LogicalKey::new(ConfigId::new("core"), Revision(3));
        let b = LogicalKey::new("core".into(), Revision(3));
        let c = LogicalKey::new("core".into(), Revision(4));

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.to_string(), "core@r3");
    }
}
