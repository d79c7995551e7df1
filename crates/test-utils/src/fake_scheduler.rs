use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use buildcoord::dag::FinalStatus;
use buildcoord::engine::BuildReporter;
use buildcoord::exec::{BuildRequest, BuildScheduler};
use buildcoord::types::{ConfigId, TaskId};

/// A fake scheduler that:
/// - records every build it is asked to start
/// - keeps the reporter so the test decides when (and how) each build ends.
///
/// Reporters are always invoked with no internal lock held, because a
/// completion can cascade into new `start` calls on this same scheduler.
#[derive(Default)]
pub struct ManualScheduler {
    state: Mutex<ManualState>,
}

#[derive(Default)]
struct ManualState {
    started: Vec<BuildRequest>,
    reporters: HashMap<TaskId, BuildReporter>,
    cancelled: Vec<TaskId>,
    refuse: HashSet<ConfigId>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `start` fail for this configuration.
    pub fn refuse(&self, config: &str) {
        self.state.lock().unwrap().refuse.insert(ConfigId::new(config));
    }

    /// Ids of started builds, in start order.
    pub fn started(&self) -> Vec<TaskId> {
        self.state.lock().unwrap().started.iter().map(|r| r.task).collect()
    }

    /// Configuration names of started builds, in start order.
    pub fn started_configs(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .started
            .iter()
            .map(|r| r.key.config.to_string())
            .collect()
    }

    pub fn start_count(&self, task: TaskId) -> usize {
        self.state
            .lock()
            .unwrap()
            .started
            .iter()
            .filter(|r| r.task == task)
            .count()
    }

    pub fn request(&self, task: TaskId) -> Option<BuildRequest> {
        self.state
            .lock()
            .unwrap()
            .started
            .iter()
            .find(|r| r.task == task)
            .cloned()
    }

    pub fn reporter(&self, task: TaskId) -> Option<BuildReporter> {
        self.state.lock().unwrap().reporters.get(&task).cloned()
    }

    /// Finish a started build. Returns whether the engine applied it.
    pub fn complete(&self, task: TaskId, status: FinalStatus) -> bool {
        match self.reporter(task) {
            Some(reporter) => reporter.complete(status),
            None => panic!("{task} was never started"),
        }
    }

    /// Walk a started build through the whole happy path.
    pub fn succeed(&self, task: TaskId) -> bool {
        let reporter = self.reporter(task).expect("build was never started");
        reporter.building();
        reporter.storing_results();
        reporter.complete(FinalStatus::Success)
    }

    pub fn cancelled(&self) -> Vec<TaskId> {
        self.state.lock().unwrap().cancelled.clone()
    }
}

impl BuildScheduler for ManualScheduler {
    fn start(&self, request: BuildRequest, reporter: BuildReporter) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.refuse.contains(&request.key.config) {
            return Err(anyhow!("no executor available for {}", request.key));
        }
        state.reporters.insert(request.task, reporter);
        state.started.push(request);
        Ok(())
    }

    fn cancel(&self, task: TaskId) -> Result<()> {
        self.state.lock().unwrap().cancelled.push(task);
        Ok(())
    }
}

/// A fake scheduler that finishes every build inside `start`.
///
/// Outcomes default to `Success` and can be overridden per configuration.
#[derive(Default)]
pub struct ImmediateScheduler {
    outcomes: Mutex<HashMap<ConfigId, FinalStatus>>,
    started: Mutex<Vec<BuildRequest>>,
}

impl ImmediateScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_outcome(self, config: &str, status: FinalStatus) -> Self {
        self.outcomes
            .lock()
            .unwrap()
            .insert(ConfigId::new(config), status);
        self
    }

    pub fn started(&self) -> Vec<TaskId> {
        self.started.lock().unwrap().iter().map(|r| r.task).collect()
    }

    pub fn started_configs(&self) -> Vec<String> {
        self.started
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.key.config.to_string())
            .collect()
    }
}

impl BuildScheduler for ImmediateScheduler {
    fn start(&self, request: BuildRequest, reporter: BuildReporter) -> Result<()> {
        let outcome = self
            .outcomes
            .lock()
            .unwrap()
            .get(&request.key.config)
            .copied()
            .unwrap_or(FinalStatus::Success);
        self.started.lock().unwrap().push(request);

        reporter.building();
        reporter.complete(outcome);
        Ok(())
    }

    fn cancel(&self, _task: TaskId) -> Result<()> {
        Ok(())
    }
}
