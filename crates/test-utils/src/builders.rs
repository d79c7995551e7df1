#![allow(dead_code)]

use std::collections::BTreeMap;

use buildcoord::config::{ConfigFile, ConfigurationEntry, RawConfigFile, SetEntry};
use buildcoord::engine::EngineOptions;
use buildcoord::store::{ConfigurationSet, MemoryDatastore};
use buildcoord::types::ConfigId;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                engine: EngineOptions::default(),
                configuration: BTreeMap::new(),
                set: BTreeMap::new(),
            },
        }
    }

    pub fn with_configuration(mut self, name: &str, entry: ConfigurationEntry) -> Self {
        self.config.configuration.insert(name.to_string(), entry);
        self
    }

    pub fn with_set(mut self, name: &str, members: &[&str]) -> Self {
        self.config.set.insert(
            name.to_string(),
            SetEntry {
                members: members.iter().map(|m| ConfigId::new(*m)).collect(),
                release_train: None,
            },
        );
        self
    }

    pub fn cascade_cancellation(mut self, on: bool) -> Self {
        self.config.engine.cascade_cancellation = on;
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `ConfigurationEntry`.
pub struct ConfigurationBuilder {
    entry: ConfigurationEntry,
}

impl ConfigurationBuilder {
    pub fn new(script: &str) -> Self {
        Self {
            entry: ConfigurationEntry {
                script: script.to_string(),
                revision: 1,
                depends_on: vec![],
            },
        }
    }

    pub fn depends_on(mut self, dep: &str) -> Self {
        self.entry.depends_on.push(ConfigId::new(dep));
        self
    }

    pub fn revision(mut self, revision: u32) -> Self {
        self.entry.revision = revision;
        self
    }

    pub fn build(self) -> ConfigurationEntry {
        self.entry
    }
}

/// Store a configuration per `(name, deps)` pair, each at revision 1.
pub fn store_with(configs: &[(&str, Vec<&str>)]) -> MemoryDatastore {
    let store = MemoryDatastore::new();
    for (name, deps) in configs {
        store.add_configuration(
            *name,
            format!("make {name}"),
            deps.iter().map(|d| ConfigId::new(*d)),
        );
    }
    store
}

/// Ad-hoc configuration set over the given members.
pub fn set_of(members: &[&str]) -> ConfigurationSet {
    ConfigurationSet::new("test-set", members.iter().map(|m| ConfigId::new(*m)))
}
