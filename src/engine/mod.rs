// src/engine/mod.rs

//! Build coordination engine.
//!
//! This module ties together:
//! - the active-task registry (duplicate-build detection)
//! - the task state machine transition operation
//! - completion propagation along dependency edges
//! - the reporter handed to the scheduler for progress callbacks
//!
//! [`CoordinationEngine`] is the façade callers use; everything else is
//! driven from it or from reporter callbacks.

use serde::Deserialize;

pub mod coordinator;
pub mod propagation;
pub mod registry;
pub mod reporter;
pub mod transition;

pub use coordinator::CoordinationEngine;
pub use registry::ActiveTaskRegistry;
pub use reporter::BuildReporter;

/// Engine behaviour switches, read from the `[engine]` config section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineOptions {
    /// When a dependency is cancelled, cancel its dependents too. When off, a
    /// cancelled dependency counts as satisfied.
    pub cascade_cancellation: bool,

    /// Reject build graphs with dependency cycles before anything is dispatched.
    pub detect_cycles: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            cascade_cancellation: true,
            detect_cycles: true,
        }
    }
}
