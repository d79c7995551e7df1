// src/exec/process.rs

//! Local process scheduler.
//!
//! Runs a configuration's build script through the platform shell on the
//! tokio runtime and reports progress back through the [`BuildReporter`].

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::dag::FinalStatus;
use crate::engine::BuildReporter;
use crate::types::TaskId;

use super::backend::{BuildRequest, BuildScheduler};

type CancelMap = Arc<Mutex<HashMap<TaskId, oneshot::Sender<()>>>>;

/// [`BuildScheduler`] that spawns one shell process per build.
///
/// A zero exit status is `Success`, any other exit is `Failed`, and a process
/// that cannot be spawned or awaited is a `SystemError`. Cancelling kills the
/// process; the engine has already recorded the task as cancelled by then, so
/// no outcome is reported for it.
#[derive(Debug, Clone)]
pub struct ProcessScheduler {
    handle: Handle,
    running: CancelMap,
}

impl ProcessScheduler {
    /// Create a scheduler bound to the current tokio runtime.
    pub fn new() -> Result<Self> {
        let handle = Handle::try_current().context("process scheduler needs a tokio runtime")?;
        Ok(Self::with_handle(handle))
    }

    pub fn with_handle(handle: Handle) -> Self {
        Self {
            handle,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of build processes still being tracked.
    pub fn running(&self) -> usize {
        lock(&self.running).len()
    }
}

impl BuildScheduler for ProcessScheduler {
    fn start(&self, request: BuildRequest, reporter: BuildReporter) -> Result<()> {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        {
            let mut running = lock(&self.running);
            if running.contains_key(&request.task) {
                anyhow::bail!("{} is already running", request.task);
            }
            running.insert(request.task, cancel_tx);
        }

        let running = Arc::clone(&self.running);
        let task = request.task;
        let span = info_span!("build", task = %task, key = %request.key, user = %request.user);
        self.handle.spawn(
            async move {
                run_build(request, reporter, cancel_rx).await;
                lock(&running).remove(&task);
                debug!("build runner finished");
            }
            .instrument(span),
        );
        Ok(())
    }

    fn cancel(&self, task: TaskId) -> Result<()> {
        match lock(&self.running).remove(&task) {
            Some(cancel) => {
                if cancel.send(()).is_err() {
                    debug!(task = %task, "build already finished while cancelling");
                }
                Ok(())
            }
            None => {
                debug!(task = %task, "no running process to cancel");
                Ok(())
            }
        }
    }
}

fn lock(map: &CancelMap) -> MutexGuard<'_, HashMap<TaskId, oneshot::Sender<()>>> {
    map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Run one build process to completion (or cancellation) and report.
async fn run_build(
    request: BuildRequest,
    reporter: BuildReporter,
    cancel_rx: oneshot::Receiver<()>,
) {
    let task = request.task;
    let key = request.key.clone();
    match run_build_inner(request, &reporter, cancel_rx).await {
        Ok(Some(status)) => {
            reporter.complete(status);
        }
        Ok(None) => {}
        Err(err) => {
            error!(task = %task, key = %key, error = %format!("{err:#}"), "build execution error");
            reporter.complete_with(FinalStatus::SystemError, format!("{err:#}"));
        }
    }
}

/// `Ok(None)` means the build was cancelled and nothing should be reported.
async fn run_build_inner(
    request: BuildRequest,
    reporter: &BuildReporter,
    mut cancel_rx: oneshot::Receiver<()>,
) -> Result<Option<FinalStatus>> {
    info!(
        task = %request.task,
        key = %request.key,
        script = %request.script,
        "starting build process"
    );

    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(&request.script);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(&request.script);
        c
    };
    cmd.env("BUILDCOORD_CONFIGURATION", request.key.config.as_str())
        .env("BUILDCOORD_REVISION", request.key.revision.0.to_string())
        .env("BUILDCOORD_USER", request.user.name())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning build process for {}", request.key))?;
    reporter.building();

    // Always drain both pipes so the child never blocks on a full buffer.
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(
            async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    info!("stdout: {}", line);
                }
            }
            .in_current_span(),
        );
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(
            async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("stderr: {}", line);
                }
            }
            .in_current_span(),
        );
    }

    tokio::select! {
        status = child.wait() => {
            let status = status
                .with_context(|| format!("waiting for build process of {}", request.key))?;
            let code = status.code().unwrap_or(-1);
            info!(
                task = %request.task,
                key = %request.key,
                exit_code = code,
                success = status.success(),
                "build process exited"
            );
            reporter.storing_results();
            Ok(Some(if status.success() {
                FinalStatus::Success
            } else {
                FinalStatus::Failed
            }))
        }

        cancel = &mut cancel_rx => {
            if cancel.is_ok() {
                info!(task = %request.task, key = %request.key, "cancellation requested; killing build process");
                if let Err(e) = child.kill().await {
                    warn!(task = %request.task, error = %e, "failed to kill build process");
                }
            }
            Ok(None)
        }
    }
}
