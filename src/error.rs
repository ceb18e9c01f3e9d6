//! Custom error types for the application.
//!
//! This module defines the primary error type, `MotionError`, for the entire
//! application. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the failure classes that matter to an operator:
//!
//! - **`ConfigMissing` / `ConfigMalformed`**: fatal at startup, reported
//!   before any controller I/O is attempted.
//! - **`OffsetMissing`**: a logical-coordinate move was requested for a stage
//!   that has never been calibrated. This is an operator error that must be
//!   fixed (or explicitly acknowledged), never silently absorbed.
//! - **`TargetCountMismatch`**: a motion line supplied the wrong number of
//!   targets. Recovered locally by the sequence runner (skip line, continue).
//! - **`MoveTimeout` / `MoveCancelled` / `ControllerFault`**: surfaced to the
//!   caller of every move, since they may indicate a physical interlock or
//!   mechanical fault.
//!
//! The benign controller replies ("already initialized", "already homed") are
//! deliberately not errors; they are modeled as
//! [`CommandOutcome::AlreadyDone`](crate::hardware::CommandOutcome).

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type MotionResult<T> = std::result::Result<T, MotionError>;

/// Application-wide error taxonomy.
#[derive(Error, Debug)]
pub enum MotionError {
    /// A required configuration file does not exist.
    #[error("missing configuration file '{}'. {hint}", .path.display())]
    ConfigMissing {
        /// Path that was looked up.
        path: PathBuf,
        /// What the operator should do about it.
        hint: String,
    },

    /// A configuration file or selection argument failed validation.
    #[error("invalid configuration: {0}")]
    ConfigMalformed(String),

    /// No zero offset recorded for a stage and uncalibrated mode was not
    /// acknowledged.
    #[error("no zero offset recorded for stage '{stage}'; run `set-zero` or pass --uncalibrated-ok")]
    OffsetMissing {
        /// Stage that has no recorded offset.
        stage: String,
    },

    /// A motion line supplied the wrong number of targets for the active
    /// stage set.
    #[error("target count mismatch: expected {expected} values, got {got}")]
    TargetCountMismatch {
        /// Number of currently active stages.
        expected: usize,
        /// Number of targets actually supplied.
        got: usize,
    },

    /// One or more stages failed to reach target within the timeout.
    #[error("move timed out; lagging stages: {}", .lagging.join(", "))]
    MoveTimeout {
        /// Stages that were still outside tolerance at the deadline.
        lagging: Vec<String>,
    },

    /// The move in progress was interrupted by the operator.
    #[error("move cancelled by operator")]
    MoveCancelled,

    /// Unexpected controller or driver failure.
    #[error("controller fault: {0}")]
    ControllerFault(String),

    /// File or network I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Position log write failure.
    #[error("position log error: {0}")]
    Log(#[from] csv::Error),
}

impl MotionError {
    /// True for errors the sequence runner recovers from by skipping the
    /// offending line instead of aborting the run.
    pub fn is_skippable(&self) -> bool {
        matches!(self, MotionError::TargetCountMismatch { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_names_lagging_stages() {
        let err = MotionError::MoveTimeout {
            lagging: vec!["G1.Pos1".into(), "G2.Pos1".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("G1.Pos1"));
        assert!(msg.contains("G2.Pos1"));
    }

    #[test]
    fn only_count_mismatch_is_skippable() {
        assert!(MotionError::TargetCountMismatch { expected: 4, got: 3 }.is_skippable());
        assert!(!MotionError::MoveCancelled.is_skippable());
        assert!(!MotionError::ControllerFault("boom".into()).is_skippable());
    }
}
