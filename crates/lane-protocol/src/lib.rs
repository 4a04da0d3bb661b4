//! Store Lane Protocol Types
//!
//! Shared data model for the build-and-publish lane: job and app records,
//! remote build run states, and the stable error-code taxonomy used across
//! the scheduler, bridge, inspector, and publish coordinator.

pub mod error;
pub mod job;
pub mod remote;

pub use error::{ErrorCode, LaneError};
pub use job::{AppRecord, BuildJob, JobState, Platform};
pub use remote::{RemoteBuildRun, RunConclusion, RunStatus};

/// Current lane version string.
pub const LANE_VERSION: &str = "0.1.0";
