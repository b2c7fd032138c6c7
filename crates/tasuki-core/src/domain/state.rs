//! Task state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a task record.
///
/// State transitions:
/// - Waiting -> InProgress (successful conditional claim)
/// - InProgress -> Done (executor returned normally)
/// - InProgress -> Error (executor failed)
///
/// Nothing leaves `Done` or `Error`, and `InProgress` never goes back to
/// `Waiting`. A worker that dies between claim and finalize leaves the
/// record `InProgress` for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    /// Produced and not yet claimed.
    Waiting,

    /// Claimed by exactly one worker.
    InProgress,

    /// Executor finished successfully.
    Done,

    /// Executor failed; `error_detail` says why.
    Error,
}

impl TaskStatus {
    /// Wire value stored in the `status` field.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Waiting => "waiting",
            TaskStatus::InProgress => "in-progress",
            TaskStatus::Done => "done",
            TaskStatus::Error => "error",
        }
    }

    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Error)
    }

    /// Is this task eligible for a claim?
    pub fn is_claimable(self) -> bool {
        matches!(self, TaskStatus::Waiting)
    }

    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Waiting, TaskStatus::InProgress)
                | (TaskStatus::InProgress, TaskStatus::Done)
                | (TaskStatus::InProgress, TaskStatus::Error)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
