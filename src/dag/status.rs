// src/dag/status.rs

//! Task and build-set status enums.

use std::fmt;

/// Lifecycle state of a single task.
///
/// Happy path:
/// `New -> WaitingForDependencies -> Enqueued -> Building -> StoringResults -> Done`
///
/// `Rejected`, `RejectedAlreadyBuilt`, `SystemError` and `Cancelled` can be
/// entered from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    New,
    WaitingForDependencies,
    Enqueued,
    Building,
    StoringResults,
    Done,
    DoneWithErrors,
    /// Not built: a dependency failed, or an identical build was already active.
    Rejected,
    /// Not built: this revision already has a successful build.
    ///
    /// Counts as completed, not failed: dependents are released and the
    /// build set can still succeed. Rebuilding an existing artifact is the
    /// only thing skipped.
    RejectedAlreadyBuilt,
    /// The scheduler could not even start the build.
    SystemError,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Done
                | TaskStatus::DoneWithErrors
                | TaskStatus::Rejected
                | TaskStatus::RejectedAlreadyBuilt
                | TaskStatus::SystemError
                | TaskStatus::Cancelled
        )
    }

    /// Whether reaching this status counts as a failure for dependents and
    /// for build-set aggregation.
    ///
    /// `RejectedAlreadyBuilt` is a completed state (the artifact exists) and
    /// `Cancelled` never cascades as a failure.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            TaskStatus::DoneWithErrors | TaskStatus::Rejected | TaskStatus::SystemError
        )
    }

    /// Position along the happy path; used to forbid backwards transitions.
    fn progress_rank(self) -> u8 {
        match self {
            TaskStatus::New => 0,
            TaskStatus::WaitingForDependencies => 1,
            TaskStatus::Enqueued => 2,
            TaskStatus::Building => 3,
            TaskStatus::StoringResults => 4,
            _ => 5,
        }
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// Terminal states are sticky. Forward moves may skip steps (a scheduler
    /// is not required to report `Building`), but never go backwards.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        if self.is_terminal() || self == next {
            return false;
        }
        if next.is_terminal() {
            return true;
        }
        // Only the scheduler may move a task past Enqueued; a task that has
        // not been dispatched cannot start building.
        if matches!(next, TaskStatus::Building | TaskStatus::StoringResults)
            && self.progress_rank() < TaskStatus::Enqueued.progress_rank()
        {
            return false;
        }
        next.progress_rank() > self.progress_rank()
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::New => "NEW",
            TaskStatus::WaitingForDependencies => "WAITING_FOR_DEPENDENCIES",
            TaskStatus::Enqueued => "ENQUEUED",
            TaskStatus::Building => "BUILDING",
            TaskStatus::StoringResults => "STORING_RESULTS",
            TaskStatus::Done => "DONE",
            TaskStatus::DoneWithErrors => "DONE_WITH_ERRORS",
            TaskStatus::Rejected => "REJECTED",
            TaskStatus::RejectedAlreadyBuilt => "REJECTED_ALREADY_BUILT",
            TaskStatus::SystemError => "SYSTEM_ERROR",
            TaskStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// How a dispatched build ended, as reported by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalStatus {
    Success,
    Failed,
    SystemError,
    Cancelled,
}

impl From<FinalStatus> for TaskStatus {
    fn from(status: FinalStatus) -> Self {
        match status {
            FinalStatus::Success => TaskStatus::Done,
            FinalStatus::Failed => TaskStatus::DoneWithErrors,
            FinalStatus::SystemError => TaskStatus::SystemError,
            FinalStatus::Cancelled => TaskStatus::Cancelled,
        }
    }
}

/// Aggregate status of a build set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskSetStatus {
    New,
    InProgress,
    Success,
    Failed,
    Cancelled,
}

impl TaskSetStatus {
    pub fn is_done(self) -> bool {
        matches!(
            self,
            TaskSetStatus::Success | TaskSetStatus::Failed | TaskSetStatus::Cancelled
        )
    }
}

impl fmt::Display for TaskSetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskSetStatus::New => "NEW",
            TaskSetStatus::InProgress => "IN_PROGRESS",
            TaskSetStatus::Success => "SUCCESS",
            TaskSetStatus::Failed => "FAILED",
            TaskSetStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}
