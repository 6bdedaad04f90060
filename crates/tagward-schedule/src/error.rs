//! Schedule error types.

use thiserror::Error;

/// Errors raised while parsing or evaluating an update schedule.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("invalid schedule window {0:?}: expected CRON|DURATION")]
    InvalidWindow(String),

    #[error("invalid cron expression {expression:?}: {reason}")]
    InvalidCron { expression: String, reason: String },

    #[error("invalid duration {0:?}")]
    InvalidDuration(String),

    #[error("previous occurrence search did not converge after {0} iterations")]
    NotConverged(u32),
}
