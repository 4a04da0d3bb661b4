//! Remote build run states.
//!
//! A [`RemoteBuildRun`] is ephemeral: it exists only while the bridge is
//! polling. Once a terminal conclusion is observed the owning `BuildJob`
//! supersedes it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Remote runner lifecycle as reported by the status poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    Completed,
}

impl RunStatus {
    /// Map the remote API's status string. Unknown strings are treated as
    /// still-queued so polling continues rather than aborting.
    pub fn from_remote(s: &str) -> Self {
        match s {
            "in_progress" => Self::InProgress,
            "completed" => Self::Completed,
            _ => Self::Queued,
        }
    }
}

/// Outcome of a completed remote run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunConclusion {
    Success,
    Failure,
    Cancelled,
    Unknown,
}

impl RunConclusion {
    /// Map the remote API's conclusion string. Anything unrecognized
    /// (skipped, timed_out, action_required, ...) folds into `Unknown`,
    /// which the pipeline treats as a failure.
    pub fn from_remote(s: &str) -> Self {
        match s {
            "success" => Self::Success,
            "failure" => Self::Failure,
            "cancelled" => Self::Cancelled,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for RunConclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// One observed remote build run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteBuildRun {
    pub run_id: u64,
    pub status: RunStatus,
    /// Present only once `status` is `Completed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<RunConclusion>,
}

impl RemoteBuildRun {
    /// True once the run reached a terminal conclusion.
    pub fn is_finished(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// True when the run finished and produced a usable build.
    pub fn is_success(&self) -> bool {
        self.is_finished() && self.conclusion == Some(RunConclusion::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping_defaults_to_queued() {
        assert_eq!(RunStatus::from_remote("queued"), RunStatus::Queued);
        assert_eq!(RunStatus::from_remote("waiting"), RunStatus::Queued);
        assert_eq!(RunStatus::from_remote("in_progress"), RunStatus::InProgress);
        assert_eq!(RunStatus::from_remote("completed"), RunStatus::Completed);
    }

    #[test]
    fn test_conclusion_mapping_folds_to_unknown() {
        assert_eq!(RunConclusion::from_remote("success"), RunConclusion::Success);
        assert_eq!(RunConclusion::from_remote("timed_out"), RunConclusion::Unknown);
    }

    #[test]
    fn test_success_requires_completion() {
        let run = RemoteBuildRun {
            run_id: 7,
            status: RunStatus::InProgress,
            conclusion: None,
        };
        assert!(!run.is_success());

        let done = RemoteBuildRun {
            run_id: 7,
            status: RunStatus::Completed,
            conclusion: Some(RunConclusion::Success),
        };
        assert!(done.is_success());
    }
}
