// src/config/model.rs

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::engine::EngineOptions;
use crate::types::ConfigId;

/// Top-level configuration as read from a TOML file:
///
/// ```toml
/// [engine]
/// cascade_cancellation = true
///
/// [configuration.core]
/// script = "make -C core"
/// revision = 3
///
/// [configuration.app]
/// script = "make -C app"
/// depends_on = ["core"]
///
/// [set.release]
/// members = ["core", "app"]
/// release_train = "2.1"
/// ```
///
/// This is the unvalidated shape; convert it to [`ConfigFile`] with
/// `ConfigFile::try_from`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    #[serde(default)]
    pub engine: EngineOptions,

    /// All configurations from `[configuration.<name>]`.
    #[serde(default)]
    pub configuration: BTreeMap<String, ConfigurationEntry>,

    /// All configuration sets from `[set.<name>]`.
    #[serde(default)]
    pub set: BTreeMap<String, SetEntry>,
}

/// Validated configuration.
///
/// Only obtainable through `TryFrom<RawConfigFile>`, so holders can rely on
/// dependencies and set members being known and acyclic.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub engine: EngineOptions,
    pub configuration: BTreeMap<String, ConfigurationEntry>,
    pub set: BTreeMap<String, SetEntry>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            engine: raw.engine,
            configuration: raw.configuration,
            set: raw.set,
        }
    }
}

/// `[configuration.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigurationEntry {
    /// Shell command that builds this configuration.
    pub script: String,

    /// Current revision; defaults to 1.
    #[serde(default = "default_revision")]
    pub revision: u32,

    /// Configurations that must be built before this one.
    #[serde(default)]
    pub depends_on: Vec<ConfigId>,
}

fn default_revision() -> u32 {
    1
}

/// `[set.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetEntry {
    pub members: Vec<ConfigId>,

    #[serde(default)]
    pub release_train: Option<String>,
}
