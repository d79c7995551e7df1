// src/errors.rs

//! Crate-wide error type.
//!
//! Only construction-time failures leave the engine as errors. Everything that
//! happens after a request was accepted (dependency rejection, scheduler start
//! failures, cancellation) is recorded as a terminal task status instead.

use thiserror::Error;

use crate::types::{LogicalKey, TaskId};

#[derive(Error, Debug)]
pub enum CoordError {
    /// A logically identical task is already queued or building.
    #[error("build of {key} is already active as {active}")]
    Conflict { key: LogicalKey, active: TaskId },

    /// Snapshot resolution or graph wiring failed; nothing was dispatched.
    #[error("could not construct build graph: {0}")]
    GraphConstruction(String),

    /// The build-set record could not be persisted at creation time.
    #[error("could not persist build set: {0}")]
    Persistence(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Cycle detected in configuration graph: {0}")]
    DagCycle(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, CoordError>;
