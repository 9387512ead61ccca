//! Error types for the scheduler crate.
//!
//! A `JobError` is the terminal failure recorded on a `JobExecution`.
//! Scheduler operations themselves (add, remove, start, stop, force
//! start) never fail; unknown ids and repeated start/stop are no-ops.

use thiserror::Error;

/// Terminal failure of a single job execution.
///
/// The error is cloned into execution snapshots, so payloads are
/// plain strings rather than source errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobError {
    /// The execution observed cancellation and stopped cooperatively.
    #[error("job was cancelled")]
    Cancelled,

    /// The user workload failed (returned an error or panicked).
    #[error("{0}")]
    Failed(String),

    /// The service provider failed while creating or resolving a scope.
    #[error("service scope error: {0}")]
    Service(String),
}

impl JobError {
    /// Build a `Failed` error from any displayable value.
    pub fn failed(msg: impl Into<String>) -> Self {
        JobError::Failed(msg.into())
    }
}
