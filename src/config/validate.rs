// src/config/validate.rs

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{CoordError, Result};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = CoordError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

/// Validate an already-converted config again (e.g. after manual edits in tests).
pub fn validate_config(cfg: &ConfigFile) -> Result<()> {
    let raw = RawConfigFile {
        engine: cfg.engine,
        configuration: cfg.configuration.clone(),
        set: cfg.set.clone(),
    };
    validate_raw_config(&raw)
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_configurations(cfg)?;
    validate_scripts(cfg)?;
    validate_dependencies(cfg)?;
    validate_sets(cfg)?;
    validate_dag(cfg)?;
    Ok(())
}

fn ensure_has_configurations(cfg: &RawConfigFile) -> Result<()> {
    if cfg.configuration.is_empty() {
        return Err(CoordError::ConfigError(
            "config must contain at least one [configuration.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_scripts(cfg: &RawConfigFile) -> Result<()> {
    for (name, conf) in cfg.configuration.iter() {
        if conf.script.trim().is_empty() {
            return Err(CoordError::ConfigError(format!(
                "configuration '{name}' has an empty `script`"
            )));
        }
        if conf.revision == 0 {
            return Err(CoordError::ConfigError(format!(
                "configuration '{name}': `revision` must be >= 1"
            )));
        }
    }
    Ok(())
}

fn validate_dependencies(cfg: &RawConfigFile) -> Result<()> {
    for (name, conf) in cfg.configuration.iter() {
        for dep in conf.depends_on.iter() {
            if dep.as_str() == name {
                return Err(CoordError::ConfigError(format!(
                    "configuration '{name}' cannot depend on itself in `depends_on`"
                )));
            }
            if !cfg.configuration.contains_key(dep.as_str()) {
                return Err(CoordError::ConfigError(format!(
                    "configuration '{name}' has unknown dependency '{dep}' in `depends_on`"
                )));
            }
        }
    }
    Ok(())
}

fn validate_sets(cfg: &RawConfigFile) -> Result<()> {
    for (name, set) in cfg.set.iter() {
        if set.members.is_empty() {
            return Err(CoordError::ConfigError(format!(
                "set '{name}' must list at least one member"
            )));
        }
        for member in set.members.iter() {
            if !cfg.configuration.contains_key(member.as_str()) {
                return Err(CoordError::ConfigError(format!(
                    "set '{name}' has unknown member '{member}'"
                )));
            }
        }
    }
    Ok(())
}

fn validate_dag(cfg: &RawConfigFile) -> Result<()> {
    // Edge direction: dependency -> dependent.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in cfg.configuration.keys() {
        graph.add_node(name.as_str());
    }
    for (name, conf) in cfg.configuration.iter() {
        for dep in conf.depends_on.iter() {
            graph.add_edge(dep.as_str(), name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(CoordError::DagCycle(format!(
            "cycle detected in configuration graph involving '{}'",
            cycle.node_id()
        ))),
    }
}
