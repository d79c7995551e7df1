// src/exec/mod.rs

//! Build execution layer.
//!
//! - [`backend`] provides the `BuildScheduler` trait the engine dispatches
//!   to, and the `BuildRequest` it hands over.
//! - [`process`] provides `ProcessScheduler`, which runs each build script as
//!   a local process using `tokio::process::Command`.

pub mod backend;
pub mod process;

pub use backend::{BuildRequest, BuildScheduler};
pub use process::ProcessScheduler;
